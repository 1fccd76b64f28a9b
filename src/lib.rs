#![deny(missing_docs)]
//! A small networked store that keeps a flat JSON key/value mapping in a JSON file.
//!
//! This crate provides the storage engine, the [`NframeServer`] and [`NframeClient`], as well
//! as the [`nframe-server`] and [`nframe-client`] executables that can be used to run and
//! talk to a server.
//!
//! ## Requests
//! A client sends an [`Envelope`], `{"command": <string>, "data": <object|null>}`:
//!
//! - `"get data"` returns the server's whole mapping
//! - any other command merges `data` into the mapping and the envelope is echoed back
//!
//! ## Framing Protocol
//! TCP gives us a byte stream, not messages. Each message is therefore sent as a header
//! announcing how many 1024 byte chunks follow, an `ok` acknowledgment from the receiver and
//! then the chunks themselves. A connection carries exactly one request and one response.
//! See the [`protocol`] module.
//!
//! ## Store
//! [`JsonStore`] keeps the mapping in a single document, `{"version": ..., "data": {...}}`.
//! Every operation reloads the document, changes it and writes it back (a [`Session`]). A
//! document that can't be parsed is moved aside to a timestamped `.backup` file instead of
//! being overwritten. Documents from other versions go through a table of [`Migrations`].
//!
//! ## Pid Lock
//! [`PidLock`] is an advisory lock file holding the pid of its owner. The server process
//! holds it while serving, and the administrative import and export paths take it, so only
//! one process at a time manages a store. Requests inside the server do not take it, so
//! concurrent requests can overwrite each other's updates.
//!
//! [`nframe-server`]: ./nframe-server.rs
//! [`nframe-client`]: ./nframe-client.rs

pub use client::NframeClient;
pub use command::{Envelope, Reply, ADD_DATA, GET_DATA};
pub use engine::{
    ExclusiveStore, JsonStore, Migration, Migrations, Session, StoreData, StoreDocument,
    StoreEngine, DEFAULT_DATA_FILE, STORE_VERSION,
};
pub use error::{LockError, NframeError, Result};
pub use lock::{default_lock_path, PidLock, PidLockGuard, LOCK_FILE_NAME};
pub use protocol::{section_count, FrameHeader, Framed, ACK, CHUNK_SIZE};
pub use server::{dispatch, NframeServer, DEFAULT_PORT};
pub use thread_pool::{NaiveThreadPool, ThreadPool};

mod client;
mod command;
mod engine;
mod error;
mod lock;
pub mod protocol;
mod server;
pub mod thread_pool;
