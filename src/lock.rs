//! An advisory, pid based file lock.
//!
//! The lock is a file at a well known path whose only content is the process id of its
//! holder. Cooperating processes (an `nframe-server` and its administrative import/export
//! runs) use it to take turns with the store file. Nothing stops a process that does not
//! check the lock from touching the store anyway.
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{LockError, NframeError, Result};

/// file name of the default lock, created in the system's temp directory
pub const LOCK_FILE_NAME: &str = "nframe.pid";

/// pause between two acquisition attempts
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// returns the default lock path: `nframe.pid` in the system temp directory
pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join(LOCK_FILE_NAME)
}

/// A pid file lock.
///
/// `PidLock` only holds the lock's configuration, the lock itself is the file on disk.
/// Acquiring writes the current process id into the file, releasing deletes it.
///
/// # Example
/// ```rust
/// use nframe::PidLock;
/// # fn main() -> nframe::Result<()> {
/// let lock = PidLock::new("/tmp/example.pid").timeout(5).safe(true);
/// {
///     let _guard = lock.lock()?;
///     // ... exclusive work ...
/// } // released here
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PidLock {
    pid_file: PathBuf,
    pid: u64,
    // number of seconds to keep retrying while another process holds the lock
    timeout: u64,
    // strict mode, re-acquiring our own lock or losing the file are errors
    safe: bool,
    cleanup_on_term: bool,
}

impl PidLock {
    /// creates a lock at `pid_file` for the current process. The timeout defaults to 0
    /// (a single attempt), safe mode and the termination hook are off.
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        PidLock {
            pid_file: pid_file.into(),
            pid: u64::from(process::id()),
            timeout: 0,
            safe: false,
            cleanup_on_term: false,
        }
    }

    /// sets how many seconds [`PidLock::acquire`] keeps retrying while another process holds
    /// the lock
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// enables or disables safe mode
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// When enabled, a lock taken with [`PidLock::lock`] is released if the process receives
    /// SIGTERM while holding it, and the process exits.
    ///
    /// Releasing the guard stops the hook, but SIGTERM does not get its default action back:
    /// from then on the process ignores SIGTERM. Only enable this for a lock that is held
    /// until the process exits, like the one of a serving `nframe-server`.
    pub fn cleanup_on_term(mut self, cleanup: bool) -> Self {
        self.cleanup_on_term = cleanup;
        self
    }

    /// acts on behalf of `pid` instead of the current process
    pub fn with_pid(mut self, pid: u64) -> Self {
        self.pid = pid;
        self
    }

    /// path of the lock file
    pub fn path(&self) -> &Path {
        &self.pid_file
    }

    /// the process id this lock is taken for
    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// acquires the lock and returns a guard that releases it when dropped
    pub fn lock(&self) -> Result<PidLockGuard<'_>> {
        self.acquire()?;
        let mut guard = PidLockGuard {
            lock: self,
            released: false,
            term_handle: None,
        };
        if self.cleanup_on_term {
            guard.term_handle = Some(self.release_on_term()?);
        }
        Ok(guard)
    }

    /// Acquires the lock, making up to `timeout + 1` attempts one second apart.
    ///
    /// # Errors
    /// - [`LockError::Timeout`] if another process held the lock on every attempt
    /// - [`LockError::Corrupt`] if the lock file does not hold a pid, this is not retried
    /// - [`LockError::Reentrant`] in safe mode if this process already holds the lock
    pub fn acquire(&self) -> Result<()> {
        let attempts = self.timeout + 1;
        let mut holder = 0;
        for attempt in 1..=attempts {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(NframeError::Lock(LockError::HeldBy { holder: pid, .. })) => {
                    holder = pid;
                    debug!(
                        "lock {:?} held by process {} (attempt {} of {})",
                        self.pid_file, pid, attempt, attempts
                    );
                    if attempt < attempts {
                        thread::sleep(RETRY_INTERVAL);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(LockError::Timeout {
            path: self.pid_file.clone(),
            holder,
        }
        .into())
    }

    /// Makes a single attempt at acquiring the lock.
    ///
    /// The file is created exclusively, so two processes can never both create it. If it
    /// already exists its recorded pid decides: another pid is [`LockError::HeldBy`], our
    /// own pid succeeds (or is [`LockError::Reentrant`] in safe mode).
    pub fn try_acquire(&self) -> Result<()> {
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.pid_file)
            {
                Ok(mut file) => {
                    let written = writeln!(file, "{}", self.pid);
                    drop(file);
                    if let Err(e) = written.and_then(|_| set_readonly(&self.pid_file, true)) {
                        // a lock file without a pid would read as corrupt to everyone else
                        if let Err(e) = set_readonly(&self.pid_file, false)
                            .and_then(|_| fs::remove_file(&self.pid_file))
                        {
                            error!("could not remove partial lock {:?}: {}", self.pid_file, e);
                        }
                        return Err(e.into());
                    }
                    debug!("process {} acquired lock {:?}", self.pid, self.pid_file);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.check_lock(false) {
                    // released between our create and our read, try to create it again
                    Err(NframeError::Io(e)) if e.kind() == ErrorKind::NotFound => continue,
                    res => return res,
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Releases the lock held by this process.
    ///
    /// A lock file that has disappeared is logged, and is an error in safe mode.
    ///
    /// # Errors
    /// [`LockError::HeldBy`] if the file records another process, [`LockError::Missing`] in
    /// safe mode if the file is gone
    pub fn release(&self) -> Result<()> {
        match self.check_lock(true) {
            Ok(()) => {}
            Err(NframeError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                warn!("pid file {:?} has been removed", self.pid_file);
                if self.safe {
                    return Err(LockError::Missing(self.pid_file.clone()).into());
                }
            }
            Err(e) => return Err(e),
        }

        match set_readonly(&self.pid_file, false).and_then(|_| fs::remove_file(&self.pid_file)) {
            Ok(()) => {
                debug!("process {} released lock {:?}", self.pid, self.pid_file);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "could not delete pid file {:?}, it was already removed",
                    self.pid_file
                );
                if self.safe {
                    Err(LockError::Missing(self.pid_file.clone()).into())
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the lock file no matter which process holds it. Used to clear a lock left
    /// behind by a crashed holder.
    ///
    /// Returns `true` if a lock file was removed, `false` if there was none.
    pub fn force_release(&self) -> Result<bool> {
        let removed = set_readonly(&self.pid_file, false)
            .and_then(|_| fs::remove_file(&self.pid_file));
        match removed {
            Ok(()) => {
                info!("forcefully removed lock {:?}", self.pid_file);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("could not remove pid file {:?}, it does not exist", self.pid_file);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// pid recorded in the lock file
    ///
    /// # Errors
    /// an IO error if the file can't be read, [`LockError::Corrupt`] if its first line is not
    /// a non-negative integer
    pub fn holder(&self) -> Result<u64> {
        let content = fs::read_to_string(&self.pid_file)?;
        content
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .parse::<u64>()
            .map_err(|_| LockError::Corrupt(self.pid_file.clone()).into())
    }

    /// checks that the existing lock file belongs to this process
    fn check_lock(&self, releasing: bool) -> Result<()> {
        let holder = self.holder()?;
        if holder != self.pid {
            return Err(LockError::HeldBy {
                path: self.pid_file.clone(),
                holder,
            }
            .into());
        }
        if self.safe && !releasing {
            return Err(LockError::Reentrant(self.pid_file.clone()).into());
        }
        Ok(())
    }

    /// starts a thread that releases this lock and exits the process on SIGTERM
    #[cfg(unix)]
    fn release_on_term(&self) -> Result<TermHandle> {
        use signal_hook::consts::SIGTERM;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new(&[SIGTERM])?;
        let handle = signals.handle();
        let lock = self.clone();
        thread::Builder::new()
            .name("pid-lock-term".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!("received signal {}, releasing {:?}", sig, lock.pid_file);
                    if let Err(e) = lock.release() {
                        error!("could not release lock on termination: {}", e);
                    }
                    process::exit(128 + sig);
                }
            })?;
        Ok(handle)
    }

    #[cfg(not(unix))]
    fn release_on_term(&self) -> Result<TermHandle> {
        warn!("releasing the lock on termination is only supported on unix");
        Ok(())
    }
}

#[cfg(unix)]
type TermHandle = signal_hook::iterator::Handle;
#[cfg(not(unix))]
type TermHandle = ();

/// Holds a [`PidLock`] until it is dropped or explicitly released.
///
/// Errors while releasing on drop can only be logged, call [`PidLockGuard::release`] to
/// receive them instead.
pub struct PidLockGuard<'a> {
    lock: &'a PidLock,
    released: bool,
    term_handle: Option<TermHandle>,
}

impl PidLockGuard<'_> {
    /// the lock this guard holds
    pub fn lock(&self) -> &PidLock {
        self.lock
    }

    /// releases the lock, returning any error
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.disarm();
        self.lock.release()
    }

    #[cfg(unix)]
    fn disarm(&mut self) {
        if let Some(handle) = self.term_handle.take() {
            handle.close();
        }
    }

    #[cfg(not(unix))]
    fn disarm(&mut self) {
        self.term_handle.take();
    }
}

impl fmt::Debug for PidLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidLockGuard")
            .field("lock", &self.lock)
            .field("released", &self.released)
            .field("release_on_term", &self.term_handle.is_some())
            .finish()
    }
}

impl Drop for PidLockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.disarm();
        if let Err(e) = self.lock.release() {
            error!("could not release lock {:?}: {}", self.lock.path(), e);
        }
    }
}

#[cfg(unix)]
fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if readonly { 0o444 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_readonly(path: &Path, readonly: bool) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(readonly);
    fs::set_permissions(path, permissions)
}
