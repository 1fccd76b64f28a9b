//! This module provides the persistent storage behind the nframe server.
//!
//! A storage engine only knows how to [`load`](StoreEngine::load) the whole key/value mapping
//! and [`save`](StoreEngine::save) it back. Every operation on top of that runs as a
//! [`Session`]: the mapping is reloaded from disk, changed in memory and written back on
//! [`Session::commit`]. This keeps every operation working on fresh data, but two sessions
//! that overlap will overwrite each other (the last one to commit wins). Use a
//! [`PidLock`](crate::PidLock) when that matters.
use serde_json::{Map, Value};

use crate::{NframeError, Result};

/// the flat key/value mapping held by a store
pub type StoreData = Map<String, Value>;

/// A trait for the basic functionality of a nframe storage engine
pub trait StoreEngine: Clone + Send + 'static {
    /// loads the current mapping from the backing storage
    fn load(&self) -> Result<StoreData>;

    /// replaces the contents of the backing storage with `data`
    fn save(&self, data: &StoreData) -> Result<()>;

    /// starts a session on a freshly loaded snapshot of the mapping
    fn begin(&self) -> Result<Session<'_, Self>> {
        let data = self.load()?;
        Ok(Session { engine: self, data })
    }

    /// returns the whole mapping
    fn get_data(&self) -> Result<StoreData> {
        let session = self.begin()?;
        let data = session.data().clone();
        session.commit()?;
        Ok(data)
    }

    /// merges `merge` into the mapping, existing keys are overwritten
    fn add_data(&self, merge: StoreData) -> Result<()> {
        let mut session = self.begin()?;
        session.data_mut().extend(merge);
        session.commit()
    }

    /// Removes every key in `keys` from the mapping.
    ///
    /// # Errors
    /// Returns [`NframeError::KeyNotFound`] if any key does not exist. Nothing is written in
    /// that case, not even the removal of the keys before it.
    fn remove_data<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        let mut session = self.begin()?;
        for key in keys {
            let key: &str = key.as_ref();
            if session.data_mut().remove(key).is_none() {
                return Err(NframeError::KeyNotFound(key.to_string()));
            }
        }
        session.commit()
    }
}

/// A snapshot of a store's mapping that is written back on [`Session::commit`].
///
/// Dropping a session without committing it discards its changes.
#[derive(Debug)]
pub struct Session<'a, E: StoreEngine> {
    engine: &'a E,
    data: StoreData,
}

impl<'a, E: StoreEngine> Session<'a, E> {
    /// the mapping as it was loaded, plus any changes made in this session
    pub fn data(&self) -> &StoreData {
        &self.data
    }

    /// mutable access to the session's mapping
    pub fn data_mut(&mut self) -> &mut StoreData {
        &mut self.data
    }

    /// saves the session's mapping to the engine
    pub fn commit(self) -> Result<()> {
        self.engine.save(&self.data)
    }
}

mod json;
mod upgrade;

pub use self::json::{ExclusiveStore, JsonStore, StoreDocument, DEFAULT_DATA_FILE, STORE_VERSION};
pub use self::upgrade::{Migration, Migrations};
