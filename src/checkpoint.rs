#![forbid(unsafe_code)]

//! Durable pagination cursors, one JSON file per target.
//!
//! The empty string is the sentinel for "start from the first page" as well as
//! "exhausted": a fresh target and a finished one look the same to the run
//! loop, which only keeps paging while a non-empty cursor is stored.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::archive::write_json_atomic;
use crate::error::CheckpointError;

/// Field holding the cursor inside a checkpoint file.
pub const TOKEN_FIELD: &str = "tokenActual";

pub trait CheckpointStore: Send + Sync {
    /// Returns the stored cursor, or an empty string when none was recorded.
    fn read(&self, target: &str) -> Result<String, CheckpointError>;

    /// Replaces the stored cursor for `target`.
    fn write(&self, target: &str, cursor: &str) -> Result<(), CheckpointError>;

    /// True when no further pages are known for `target`.
    fn is_exhausted(&self, target: &str) -> Result<bool, CheckpointError> {
        Ok(self.read(target)?.is_empty())
    }
}

/// Stores `{"tokenActual": "<cursor>"}` under `<dir>/<target>.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Keys made of ASCII alphanumerics, `-` and `_` are used verbatim; every
    /// other byte is written as `%XX`, so distinct keys never share a file.
    pub fn path_for(&self, target: &str) -> PathBuf {
        let mut name = String::with_capacity(target.len());
        for byte in target.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.json"))
    }

    fn load(&self, path: &Path) -> Result<Option<Map<String, Value>>, CheckpointError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(CheckpointError::Malformed {
                path: path.to_path_buf(),
                reason: "expected a JSON object".into(),
            }),
            Err(err) => Err(CheckpointError::Malformed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn read(&self, target: &str) -> Result<String, CheckpointError> {
        let path = self.path_for(target);
        let Some(record) = self.load(&path)? else {
            return Ok(String::new());
        };
        match record.get(TOKEN_FIELD) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(token)) => Ok(token.clone()),
            Some(other) => Err(CheckpointError::Malformed {
                path,
                reason: format!("{TOKEN_FIELD} must be a string, found {other}"),
            }),
        }
    }

    fn write(&self, target: &str, cursor: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(target);
        // Unrelated keys written by operators survive the update.
        let mut record = self.load(&path)?.unwrap_or_default();
        record.insert(TOKEN_FIELD.to_string(), Value::String(cursor.to_string()));
        write_json_atomic(&path, &Value::Object(record))
            .map_err(|source| CheckpointError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_checkpoint_reads_as_first_page() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert_eq!(store.read("channel-UC1").unwrap(), "");
        assert!(store.is_exhausted("channel-UC1").unwrap());
    }

    #[test]
    fn write_then_read_returns_cursor() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.write("channel-UC1", "CAUQAA").unwrap();
        assert_eq!(store.read("channel-UC1").unwrap(), "CAUQAA");
        assert!(!store.is_exhausted("channel-UC1").unwrap());

        store.write("channel-UC1", "").unwrap();
        assert!(store.is_exhausted("channel-UC1").unwrap());
    }

    #[test]
    fn targets_are_isolated() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.write("channel-A", "tokA").unwrap();
        store.write("playlist-B", "tokB").unwrap();
        assert_eq!(store.read("channel-A").unwrap(), "tokA");
        assert_eq!(store.read("playlist-B").unwrap(), "tokB");
    }

    #[test]
    fn write_preserves_unrelated_keys() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let path = store.path_for("channel-A");
        fs::write(&path, r#"{"tokenActual": "", "note": "keep me"}"#).unwrap();
        store.write("channel-A", "next").unwrap();

        let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["note"], "keep me");
        assert_eq!(stored[TOKEN_FIELD], "next");
    }

    #[test]
    fn malformed_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        fs::write(store.path_for("channel-A"), "not json").unwrap();
        let err = store.read("channel-A").unwrap_err();
        assert!(matches!(err, CheckpointError::Malformed { .. }));

        fs::write(store.path_for("channel-A"), r#"{"tokenActual": 7}"#).unwrap();
        assert!(store.read("channel-A").is_err());
    }

    #[test]
    fn target_keys_become_safe_file_names() {
        let store = FileCheckpointStore::new("/state");
        assert_eq!(
            store.path_for("channel-UC_x-1"),
            PathBuf::from("/state/channel-UC_x-1.json")
        );
        assert_eq!(
            store.path_for("playlist-PL../x y"),
            PathBuf::from("/state/playlist-PL%2E%2E%2Fx%20y.json")
        );
    }

    #[test]
    fn keys_differing_only_in_punctuation_keep_separate_cursors() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let keys = ["video-a b", "video-a_b", "video-a.b", "video-ab", "video-a%20b"];

        let paths: std::collections::HashSet<_> =
            keys.iter().map(|key| store.path_for(key)).collect();
        assert_eq!(paths.len(), keys.len());

        for key in keys {
            store.write(key, &format!("tok {key}")).unwrap();
        }
        for key in keys {
            assert_eq!(store.read(key).unwrap(), format!("tok {key}"));
        }
    }
}
