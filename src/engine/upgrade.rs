use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use tracing::{debug, info, warn};

use super::StoreDocument;
use crate::{NframeError, Result};

/// A function that converts a store document from one schema version to a later one.
/// It must set the returned document's `version`.
pub type Migration = fn(StoreDocument) -> Result<StoreDocument>;

/// Table of schema migrations, keyed by the version a [`Migration`] upgrades *from*.
///
/// The table is empty for now, every released store version shares the same schema.
#[derive(Debug, Clone, Default)]
pub struct Migrations {
    table: BTreeMap<String, Migration>,
}

impl Migrations {
    /// creates an empty migration table
    pub fn new() -> Self {
        Self::default()
    }

    /// registers `migration` for documents stored with version `from`
    pub fn register(mut self, from: impl Into<String>, migration: Migration) -> Self {
        self.table.insert(from.into(), migration);
        self
    }

    /// Upgrades `doc` to the `current` version by applying migrations until the document's
    /// version has none registered.
    ///
    /// Documents written by a newer version are returned untouched.
    pub fn upgrade(&self, mut doc: StoreDocument, current: &str) -> Result<StoreDocument> {
        match compare_versions(&doc.version, current) {
            Some(Ordering::Equal) => return Ok(doc),
            Some(Ordering::Greater) => {
                warn!(
                    "store version {} is newer than this version ({}), loading as is",
                    doc.version, current
                );
                return Ok(doc);
            }
            Some(Ordering::Less) => {}
            None => debug!(
                "could not compare store version {} with {}",
                doc.version, current
            ),
        }

        let mut applied = BTreeSet::new();
        while let Some(migration) = self.table.get(&doc.version) {
            if !applied.insert(doc.version.clone()) {
                return Err(NframeError::Store(format!(
                    "migration loop detected at version {}",
                    doc.version
                )));
            }
            let from = doc.version.clone();
            doc = migration(doc)?;
            info!("migrated store from version {} to {}", from, doc.version);
        }
        Ok(doc)
    }
}

fn compare_versions(stored: &str, current: &str) -> Option<Ordering> {
    let stored = Version::parse(stored).ok()?;
    let current = Version::parse(current).ok()?;
    Some(stored.cmp(&current))
}
