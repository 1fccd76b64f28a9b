use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with an [`NframeError`]
pub type Result<T> = std::result::Result<T, NframeError>;

/// The Error variants used throughout the nframe store, server and client.
/// Lower level errors from third party crates and std are wrapped by their own variant.
#[derive(Error, Debug)]
pub enum NframeError {
    /// variant for errors caused from file or socket IO
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serde Error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// the pid lock could not be acquired or released
    #[error(transparent)]
    Lock(#[from] LockError),

    /// the store document could not be loaded or saved
    #[error("store error: {0}")]
    Store(String),

    /// variant for errors when a key was not found in the store
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// a peer violated the framing protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// a value (usually a command line argument) could not be parsed
    #[error("parsing error: {0}")]
    Parsing(String),
}

/// Failures of the pid file lock
#[derive(Error, Debug)]
pub enum LockError {
    /// another process kept the lock for the entire timeout
    #[error("timed out waiting for lock {path:?}, held by process {holder}")]
    Timeout {
        /// path of the lock file
        path: PathBuf,
        /// pid recorded in the lock file on the last attempt
        holder: u64,
    },

    /// the lock file is owned by a different process
    #[error("lock {path:?} is held by process {holder}")]
    HeldBy {
        /// path of the lock file
        path: PathBuf,
        /// pid recorded in the lock file
        holder: u64,
    },

    /// the lock file does not contain a non-negative integer
    #[error("lock file {0:?} is improperly formatted, cannot read")]
    Corrupt(PathBuf),

    /// safe mode forbids a process from acquiring a lock it already holds
    #[error("already obtained lock {0:?}, safe mode prohibited")]
    Reentrant(PathBuf),

    /// the lock file disappeared while it was held
    #[error("unsafe exit, pid file {0:?} not found")]
    Missing(PathBuf),
}
