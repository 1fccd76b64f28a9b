use std::ffi::OsString;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::BufWriter;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use super::{Migrations, StoreData, StoreEngine};
use crate::lock::{PidLock, PidLockGuard};
use crate::{NframeError, Result};

/// schema version written into every store document
pub const STORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// file name of the default store document
pub const DEFAULT_DATA_FILE: &str = "data.json";

// makes temp file names unique between the threads of one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The on-disk representation of a store: `{"version": ..., "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// the nframe version that wrote the document
    pub version: String,
    /// the key/value mapping
    pub data: StoreData,
}

// serialization twin of `StoreDocument` that borrows the mapping
#[derive(Serialize)]
struct DocumentRef<'a> {
    version: &'a str,
    data: &'a StoreData,
}

/// A [`StoreEngine`] that keeps the mapping in a single JSON file.
///
/// Every save writes the whole document to a temp file next to the data file and renames it
/// over the data file, so a load only ever sees a complete document. Loads and saves of
/// different sessions still interleave freely: two overlapping sessions lose one update,
/// they never corrupt the file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    // path to the store document
    data_file: PathBuf,
    // version written on save, documents with another version get upgraded on load
    version: String,
    migrations: Migrations,
}

impl JsonStore {
    /// creates a store backed by `data_file`. The file is not touched until the first
    /// load or save.
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        JsonStore {
            data_file: data_file.into(),
            version: STORE_VERSION.to_string(),
            migrations: Migrations::new(),
        }
    }

    /// replaces the store's migration table
    pub fn with_migrations(mut self, migrations: Migrations) -> Self {
        self.migrations = migrations;
        self
    }

    /// path of the backing file
    pub fn path(&self) -> &Path {
        &self.data_file
    }

    /// Acquires `lock`, then loads and saves the store once so that the file exists.
    ///
    /// The lock is held until the returned [`ExclusiveStore`] is finished or dropped.
    pub fn exclusive<'a>(&'a self, lock: &'a PidLock) -> Result<ExclusiveStore<'a>> {
        let guard = lock.lock()?;
        let data = self.load()?;
        self.save(&data)?;
        Ok(ExclusiveStore { store: self, guard })
    }

    /// merges the mapping of the store document at `path` into this store
    #[instrument(skip(self))]
    pub fn import_data(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path)
            .map_err(|e| NframeError::Store(format!("could not read {:?}: {}", path, e)))?;
        let doc: StoreDocument = serde_json::from_slice(&bytes).map_err(|e| {
            NframeError::Store(format!("{:?} is not a store document: {}", path, e))
        })?;
        let doc = self.migrations.upgrade(doc, &self.version)?;

        let mut session = self.begin()?;
        let count = doc.data.len();
        session.data_mut().extend(doc.data);
        session.commit()?;
        info!("imported {} keys from {:?}", count, path);
        Ok(())
    }

    /// writes the whole store, pretty printed, to `path`
    #[instrument(skip(self))]
    pub fn export_data(&self, path: &Path) -> Result<()> {
        let session = self.begin()?;
        let doc = DocumentRef {
            version: &self.version,
            data: session.data(),
        };
        write_document(path, &doc, true)?;
        info!("exported {} keys to {:?}", session.data().len(), path);
        session.commit()
    }

    /// moves a file that could not be parsed out of the way and returns its new path
    fn quarantine(&self) -> Result<PathBuf> {
        let mut backup: OsString = self.data_file.clone().into_os_string();
        backup.push(Local::now().format("%Y%m%dT%H%M%S%.6f").to_string());
        backup.push(".backup");
        let backup = PathBuf::from(backup);
        fs::rename(&self.data_file, &backup).map_err(|e| {
            NframeError::Store(format!(
                "could not move {:?} to {:?}: {}",
                self.data_file, backup, e
            ))
        })?;
        Ok(backup)
    }
}

impl StoreEngine for JsonStore {
    /// Loads the mapping from the data file.
    ///
    /// A missing file is an empty store. A file that is not a valid store document is
    /// renamed to `<data file><timestamp>.backup` and an error is returned, the next save
    /// then starts a new file. Documents written by another version are passed through
    /// the store's [`Migrations`].
    fn load(&self) -> Result<StoreData> {
        if !self.data_file.exists() {
            debug!("{:?} does not exist, starting with an empty store", self.data_file);
            return Ok(StoreData::new());
        }

        let bytes = fs::read(&self.data_file).map_err(|e| {
            NframeError::Store(format!("could not read {:?}: {}", self.data_file, e))
        })?;
        let doc: StoreDocument = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                let backup = self.quarantine()?;
                error!(
                    "{:?} is not a valid store document ({}), moved it to {:?}",
                    self.data_file, e, backup
                );
                return Err(NframeError::Store(format!(
                    "data could not be loaded from {:?}: {}",
                    self.data_file, e
                )));
            }
        };

        let doc = if doc.version != self.version {
            self.migrations.upgrade(doc, &self.version)?
        } else {
            doc
        };
        Ok(doc.data)
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let doc = DocumentRef {
            version: &self.version,
            data,
        };
        write_document(&self.data_file, &doc, false)
    }
}

/// writes `doc` to a unique temp file and renames it over `path`
fn write_document(path: &Path, doc: &DocumentRef<'_>, pretty: bool) -> Result<()> {
    let temp_path = temp_path(path);
    let written = write_temp(&temp_path, doc, pretty)
        .and_then(|_| fs::rename(&temp_path, path).map_err(NframeError::from));
    if let Err(e) = written {
        if let Err(e) = fs::remove_file(&temp_path) {
            debug!("could not remove temp file {:?}: {}", temp_path, e);
        }
        return Err(save_error(path, e));
    }
    Ok(())
}

fn write_temp(temp_path: &Path, doc: &DocumentRef<'_>, pretty: bool) -> Result<()> {
    let mut writer = BufWriter::new(File::create(temp_path)?);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, doc)?;
    } else {
        serde_json::to_writer(&mut writer, doc)?;
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// `<path>.<pid>.<n>.tmp`, in the same directory so the rename stays on one file system
fn temp_path(path: &Path) -> PathBuf {
    let mut temp: OsString = path.as_os_str().to_os_string();
    temp.push(format!(
        ".{}.{}.tmp",
        process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(temp)
}

fn save_error(path: &Path, e: impl Display) -> NframeError {
    NframeError::Store(format!("data could not be saved to {:?}: {}", path, e))
}

/// A [`JsonStore`] used while holding its [`PidLock`].
///
/// Derefs to the store, so all store operations are available. Call
/// [`ExclusiveStore::finish`] to flush and release the lock with error reporting, dropping
/// it only releases the lock.
#[derive(Debug)]
pub struct ExclusiveStore<'a> {
    store: &'a JsonStore,
    guard: PidLockGuard<'a>,
}

impl ExclusiveStore<'_> {
    /// reloads and saves the store one last time, then releases the lock
    pub fn finish(self) -> Result<()> {
        let ExclusiveStore { store, guard } = self;
        let data = store.load()?;
        store.save(&data)?;
        guard.release()
    }
}

impl Deref for ExclusiveStore<'_> {
    type Target = JsonStore;

    fn deref(&self) -> &JsonStore {
        self.store
    }
}
