//! Durable record of the published status message id.
//!
//! The record is a single JSON object, `{"message_id": "..."}`, rewritten
//! atomically (temp file in the same directory, fsync, rename) on every change.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default, deserialize_with = "snowflake")]
    message_id: Option<String>,
}

/// Ids may have been written as JSON numbers by earlier deployments.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

fn snowflake<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    }))
}

/// File-backed storage for the message reference
#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored id. A missing or unreadable record means "no message".
    pub fn load(&self) -> Option<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored message reference");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read message reference");
                return None;
            }
        };

        match serde_json::from_str::<StoredRecord>(&raw) {
            Ok(record) => record.message_id.filter(|id| !id.trim().is_empty()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed message reference");
                None
            }
        }
    }

    /// Atomically replace the stored record.
    pub fn save(&self, message_id: Option<&str>) -> Result<()> {
        let record = StoredRecord {
            message_id: message_id.map(str::to_string),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::Persistence(format!("serialize: {e}")))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Persistence(format!("create {}: {e}", dir.display())))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| Error::Persistence(format!("temp file in {}: {e}", dir.display())))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::Persistence(format!("write: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Persistence(format!("rename to {}: {}", self.path.display(), e.error)))?;

        debug!(path = %self.path.display(), message_id = ?message_id, "Stored message reference");
        Ok(())
    }
}
