//! Instance Records
//!
//! Separate invocations of the tool share no memory, so an instance that
//! outlives the `start` step is noted on disk for the `stop` step to find.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dynamo_emulator_core::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::instance::InstanceInfo;

/// On-disk note of a running emulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl From<&InstanceInfo> for InstanceRecord {
    fn from(info: &InstanceInfo) -> Self {
        Self {
            port: info.port,
            pid: info.pid,
            started_at: info.started_at,
        }
    }
}

/// Directory holding one record per port
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record file for `port`
    pub fn record_path(&self, port: u16) -> PathBuf {
        self.root.join(format!("instance-{}.json", port))
    }

    /// Read the record for `port`, `None` if there is none
    pub async fn load(&self, port: u16) -> Result<Option<InstanceRecord>> {
        let path = self.record_path(port);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write (or replace) the record for `record.port`.
    ///
    /// The record is written next to its final path and renamed into place, so
    /// readers see either the old record or the new one.
    pub async fn save(&self, record: &InstanceRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.record_path(record.port);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Instance record saved to {:?}", path);
        Ok(())
    }

    /// Delete the record for `port`. Returns whether one existed.
    pub async fn remove(&self, port: u16) -> Result<bool> {
        match tokio::fs::remove_file(self.record_path(port)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamo_emulator_core::DynamoEmulatorError;

    fn record(port: u16) -> InstanceRecord {
        InstanceRecord {
            port,
            pid: 4242,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path().join("nested"));

        assert_eq!(state.load(8000).await.unwrap(), None);

        let saved = record(8000);
        state.save(&saved).await.unwrap();
        assert_eq!(state.load(8000).await.unwrap(), Some(saved));
        assert_eq!(state.load(8001).await.unwrap(), None);

        assert!(state.remove(8000).await.unwrap());
        assert!(!state.remove(8000).await.unwrap());
        assert_eq!(state.load(8000).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        std::fs::write(state.record_path(8000), "{\"port\": 8000, \"pid\"").unwrap();

        let saved = record(8000);
        state.save(&saved).await.unwrap();
        assert_eq!(state.load(8000).await.unwrap(), Some(saved));

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("instance-8000.json")]);
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        std::fs::write(state.record_path(8000), "not json").unwrap();

        assert!(matches!(
            state.load(8000).await,
            Err(DynamoEmulatorError::Json(_))
        ));
    }
}
