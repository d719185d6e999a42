//! File-backed store
//!
//! Keeps all tables in one JSON document. Writes are applied to a copy,
//! persisted, and only then swapped in, so a failed write leaves both the
//! file and the in-memory tables unchanged.
//!
//! Every write rewrites the whole document with blocking `std::fs` calls
//! while the lock is held, including video progress ticks. That is fine for
//! the CLI and small stores; a server should use a database-backed store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::debug;

use super::{CatalogImport, StoreData, Tables};
use crate::error::StoreError;

/// Store persisted to a single JSON file
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse store {:?}", path))?
        } else {
            StoreData::default()
        };

        Ok(Self { path, data: Mutex::new(data) })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge authored content into the store
    pub fn import(&self, catalog: CatalogImport) -> Result<(), StoreError> {
        self.write(|data| data.import(catalog))
    }

    /// Read a catalog import file, rejecting quizzes that cannot be passed
    pub fn read_catalog(path: &Path) -> Result<CatalogImport> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog from {:?}", path))?;
        let catalog: CatalogImport = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse catalog {:?}", path))?;
        for quiz in &catalog.quizzes {
            quiz.validate().with_context(|| format!("Invalid quiz in catalog {:?}", path))?;
        }
        Ok(catalog)
    }

    /// Record an enrollment; returns false if it already existed
    pub fn enroll(&self, user_id: &str, course_slug: &str) -> Result<bool, StoreError> {
        self.write(|data| data.enroll(user_id, course_slug))
    }

    /// Set a learner's display name
    pub fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), StoreError> {
        self.write(|data| {
            data.profiles.insert(user_id.to_string(), name.to_string());
        })
    }

    /// Blocking write of the whole document
    fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        // Write to a sibling file first so a crash never leaves a truncated store
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted store to {:?}", self.path);
        Ok(())
    }
}

impl Tables for JsonStore {
    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        let data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&data)
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreData) -> R) -> Result<R, StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = data.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        *data = next;
        Ok(result)
    }
}
