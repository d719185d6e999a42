//! In-memory store

use std::sync::Mutex;

use super::{CatalogImport, StoreData, Tables};
use crate::error::StoreError;

/// Store keeping all tables in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with authored content
    pub fn with_catalog(catalog: CatalogImport) -> Self {
        let mut data = StoreData::default();
        data.import(catalog);
        Self { data: Mutex::new(data) }
    }

    /// Record an enrollment
    pub fn enroll(&self, user_id: &str, course_slug: &str) {
        let _ = self.write(|data| data.enroll(user_id, course_slug));
    }

    /// Set a learner's display name
    pub fn set_display_name(&self, user_id: &str, name: &str) {
        let _ = self.write(|data| data.profiles.insert(user_id.to_string(), name.to_string()));
    }

    /// Copy of every table, for inspection
    pub fn snapshot(&self) -> StoreData {
        self.read(StoreData::clone)
    }
}

impl Tables for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        let data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&data)
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreData) -> R) -> Result<R, StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(f(&mut data))
    }
}
