//! The chunked framing protocol shared by [`NframeClient`] and [`NframeServer`].
//!
//! A TCP stream has no message boundaries, so every message is sent as a "frame":
//!
//! 1. the sender writes a [`FrameHeader`], `{"sections": N}`, where `N` is the number of
//! [`CHUNK_SIZE`] byte chunks the payload will be split into
//! 2. the receiver answers with the two byte [`ACK`] token, `ok`
//! 3. the sender writes the payload as `N` consecutive chunks, the last one may be shorter
//! 4. the receiver reads `N` chunks and concatenates them back into the payload
//!
//! A request/response exchange is two frames: the client sends one and then receives one,
//! the server does the opposite.
//!
//! The header is expected to arrive in a single read of at most [`CHUNK_SIZE`] bytes. A
//! stream transport does not guarantee this, but the header is only a few bytes long and
//! nothing else is in flight while the sender waits for the acknowledgment.
//!
//! [`NframeClient`]: ./struct.NframeClient.html
//! [`NframeServer`]: ./struct.NframeServer.html

use std::io::{ErrorKind, Read, Write};

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{NframeError, Result};

/// maximum size, in bytes, of the header read and of every payload chunk
pub const CHUNK_SIZE: usize = 1024;

/// the token a receiver sends after it has decoded a header
pub const ACK: &[u8; 2] = b"ok";

/// Declares how many chunks follow it on the stream
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// number of chunks in the frame
    pub sections: usize,
}

impl FrameHeader {
    /// builds the header for a payload of `len` bytes
    pub fn for_len(len: usize) -> Self {
        FrameHeader {
            sections: section_count(len),
        }
    }
}

/// number of [`CHUNK_SIZE`] chunks needed to carry `len` bytes, i.e. `ceil(len / 1024)`
pub fn section_count(len: usize) -> usize {
    (len + CHUNK_SIZE - 1) / CHUNK_SIZE
}

/// A stream wrapper that sends and receives whole messages using the framing protocol.
///
/// `S` is usually a [`TcpStream`](std::net::TcpStream) (or a `&TcpStream`), but anything
/// that is `Read + Write` will do.
#[derive(Debug)]
pub struct Framed<S: Read + Write> {
    stream: S,
}

impl<S: Read + Write> Framed<S> {
    /// wraps the given `stream`
    pub fn new(stream: S) -> Self {
        Framed { stream }
    }

    /// returns the wrapped stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// serializes `msg` to JSON and sends it as a single frame
    pub fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        self.send_bytes(&payload)
    }

    /// receives a single frame and deserializes its payload from JSON
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.receive_sections(json_complete)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// sends `payload` as a frame: header, wait for the acknowledgment, then the chunks
    pub fn send_bytes(&mut self, payload: &[u8]) -> Result<()> {
        let header = FrameHeader::for_len(payload.len());
        self.stream.write_all(&serde_json::to_vec(&header)?)?;
        self.stream.flush()?;
        trace!(?header, "header sent");

        let mut ack = [0_u8; 2];
        self.stream.read_exact(&mut ack).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                NframeError::Protocol("connection closed before acknowledgment".to_string())
            }
            _ => NframeError::Io(e),
        })?;
        if &ack != ACK {
            return Err(NframeError::Protocol(format!(
                "expected acknowledgment {:?}, received {:?}",
                String::from_utf8_lossy(ACK),
                String::from_utf8_lossy(&ack)
            )));
        }

        for chunk in payload.chunks(CHUNK_SIZE) {
            self.stream.write_all(chunk)?;
        }
        self.stream.flush()?;
        debug!(
            "sent {} bytes in {} sections",
            payload.len(),
            header.sections
        );
        Ok(())
    }

    /// receives a frame and returns its raw payload.
    ///
    /// The final chunk is taken from a single read, so a payload whose last chunk is split
    /// by the transport comes back truncated. Use [`Framed::receive`] for JSON messages.
    pub fn receive_bytes(&mut self) -> Result<Vec<u8>> {
        self.receive_sections(|_| true)
    }

    /// reads a header, acknowledges it, then reads the announced number of chunks.
    ///
    /// Every chunk but the last is exactly [`CHUNK_SIZE`] bytes. The last one is read until
    /// `complete` accepts the accumulated payload or the chunk is full.
    fn receive_sections(&mut self, complete: impl Fn(&[u8]) -> bool) -> Result<Vec<u8>> {
        let header = self.read_header()?;
        self.stream.write_all(ACK)?;
        self.stream.flush()?;

        // the header comes from the peer, don't trust it for the allocation size
        let mut payload = Vec::with_capacity(header.sections.min(64) * CHUNK_SIZE);
        let mut chunk = [0_u8; CHUNK_SIZE];
        for section in 0..header.sections {
            if section + 1 < header.sections {
                self.stream.read_exact(&mut chunk).map_err(|e| match e.kind() {
                    ErrorKind::UnexpectedEof => NframeError::Protocol(format!(
                        "connection closed in section {} of {}",
                        section + 1,
                        header.sections
                    )),
                    _ => NframeError::Io(e),
                })?;
                payload.extend_from_slice(&chunk);
                continue;
            }

            let mut filled = 0;
            loop {
                let n = self.stream.read(&mut chunk[filled..])?;
                if n == 0 {
                    if filled == 0 {
                        return Err(NframeError::Protocol(format!(
                            "connection closed in section {} of {}",
                            section + 1,
                            header.sections
                        )));
                    }
                    break;
                }
                payload.extend_from_slice(&chunk[filled..filled + n]);
                filled += n;
                if filled == CHUNK_SIZE || complete(&payload) {
                    break;
                }
            }
        }
        debug!(
            "received {} bytes in {} sections",
            payload.len(),
            header.sections
        );
        Ok(payload)
    }

    fn read_header(&mut self) -> Result<FrameHeader> {
        let mut buf = [0_u8; CHUNK_SIZE];
        let n = self.stream.read(&mut buf)?;
        if n == 0 {
            return Err(NframeError::Protocol(
                "connection closed before a header was received".to_string(),
            ));
        }
        let header: FrameHeader = serde_json::from_slice(&buf[..n]).map_err(|e| {
            NframeError::Protocol(format!(
                "invalid frame header {:?}: {}",
                String::from_utf8_lossy(&buf[..n]),
                e
            ))
        })?;
        trace!(?header, "header received");
        Ok(header)
    }
}

/// true unless `buf` is the beginning of a JSON document that has not fully arrived
fn json_complete(buf: &[u8]) -> bool {
    match serde_json::from_slice::<IgnoredAny>(buf) {
        Ok(_) => true,
        Err(e) => !e.is_eof(),
    }
}
