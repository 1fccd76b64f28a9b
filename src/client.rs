use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use serde_json::Value;
use tracing::{debug, warn};

use crate::command::{Envelope, Reply, ADD_DATA, GET_DATA};
use crate::engine::StoreData;
use crate::protocol::Framed;
use crate::{NframeError, Result};

/// `NframeClient` contains the functionality for communication with an [`NframeServer`].
///
/// Every call opens a new connection, performs one request/response exchange and closes
/// the connection again.
///
/// [`NframeServer`]: ./struct.NframeServer.html
#[derive(Debug, Clone)]
pub struct NframeClient {
    addrs: Vec<SocketAddr>,
}

impl NframeClient {
    /// creates a client for the server at `addr`. No connection is made yet.
    ///
    /// # Errors
    /// returns [`NframeError::Parsing`] if `addr` does not resolve to any socket address
    pub fn new<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(NframeError::Parsing(
                "server address did not resolve to any socket address".to_string(),
            ));
        }
        Ok(NframeClient { addrs })
    }

    /// sends `data` to be merged into the server's store. On success the server echoes the
    /// request envelope back.
    pub fn message(&self, data: StoreData) -> Reply {
        self.communicate(ADD_DATA, Some(data))
    }

    /// fetches the server's whole mapping
    pub fn get_data(&self) -> Reply {
        self.communicate(GET_DATA, None)
    }

    /// Sends a `command` with its `data` and returns the server's response.
    ///
    /// Connection and protocol failures are not returned as errors, the call yields
    /// [`Reply::Failed`] and the cause is logged.
    pub fn communicate(&self, command: &str, data: Option<StoreData>) -> Reply {
        let envelope = Envelope::new(command, data);
        match self.exchange(&envelope) {
            Ok(value) => Reply::Ok(value),
            Err(e) => {
                warn!("Error while communicating with {:?}: {}", self.addrs, e);
                Reply::Failed
            }
        }
    }

    fn exchange(&self, envelope: &Envelope) -> Result<Value> {
        let tcp = TcpStream::connect(&self.addrs[..])?;
        let mut framed = Framed::new(tcp);
        framed.send(envelope)?;
        debug!("Request sent: {:?}", envelope);
        let response = framed.receive()?;
        debug!("Response received: {}", response);
        Ok(response)
    }
}
