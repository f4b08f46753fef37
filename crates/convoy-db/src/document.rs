//! Singleton JSON documents (budget ledger, safety state, approvals, rollback log).

use crate::atomic::{read_json, write_json_atomic};
use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// A single JSON file guarded by one dedicated lock.
///
/// The file is read lazily on first access; `initial` is used when it does
/// not exist yet.
pub struct JsonDocument<T> {
    path: PathBuf,
    initial: T,
    state: Mutex<Option<T>>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(path: impl Into<PathBuf>, initial: T) -> Self {
        Self {
            path: path.into(),
            initial,
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current(&self, slot: &mut Option<T>) -> Result<T> {
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = read_json::<T>(&self.path)?.unwrap_or_else(|| self.initial.clone());
        *slot = Some(value.clone());
        Ok(value)
    }

    /// Snapshot of the current value.
    pub fn read(&self) -> Result<T> {
        let mut slot = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.current(&mut slot)
    }

    /// Read-modify-write under the document lock.
    ///
    /// `f` works on a copy; the copy is written to disk and only then becomes
    /// the cached value. If `f` returns an error nothing is written.
    pub fn update<U, E>(&self, f: impl FnOnce(&mut T) -> Result<U, E>) -> Result<U, E>
    where
        E: From<anyhow::Error>,
    {
        let mut slot = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut value = self.current(&mut slot)?;
        let out = f(&mut value)?;
        write_json_atomic(&self.path, &value)?;
        *slot = Some(value);
        Ok(out)
    }
}
