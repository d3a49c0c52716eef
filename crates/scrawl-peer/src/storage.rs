//! Display-name persistence.
//!
//! Best-effort collaborator: failures are logged at debug level and
//! swallowed, a missing name is simply `None`.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub trait NameStore {
    /// Persist the display name. Returns whether the write took.
    fn save(&mut self, name: &str) -> bool;
    fn load(&self) -> Option<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSettings {
    name: String,
}

/// JSON-file-backed store.
pub struct FileNameStore {
    path: PathBuf,
}

impl FileNameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NameStore for FileNameStore {
    fn save(&mut self, name: &str) -> bool {
        let settings = StoredSettings {
            name: name.to_string(),
        };
        let Ok(json) = serde_json::to_string(&settings) else {
            return false;
        };
        match fs::write(&self.path, json) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), %err, "name save failed");
                false
            }
        }
    }

    fn load(&self) -> Option<String> {
        let json = fs::read_to_string(&self.path).ok()?;
        let settings: StoredSettings = serde_json::from_str(&json).ok()?;
        Some(settings.name)
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryNameStore {
    name: Option<String>,
}

impl MemoryNameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameStore for MemoryNameStore {
    fn save(&mut self, name: &str) -> bool {
        self.name = Some(name.to_string());
        true
    }

    fn load(&self) -> Option<String> {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let mut store = MemoryNameStore::new();
        assert_eq!(store.load(), None);
        assert!(store.save("Ada"));
        assert_eq!(store.load(), Some("Ada".to_string()));
    }

    #[test]
    fn test_file_store_missing_file_is_none() {
        let store = FileNameStore::new("/nonexistent/dir/settings.json");
        assert_eq!(store.load(), None);
    }
}
