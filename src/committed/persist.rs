//! Durable storage for the committed configuration
//!
//! The file at `<data_dir>/metadata/replicate_config.json` is either the
//! previous committed configuration or the new one, never a mix:
//! 1. write the full document to a temp file
//! 2. fsync the temp file
//! 3. rename over the final path
//! 4. fsync the directory so the rename itself is durable

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::{CdcError, CdcResult};

use super::CommittedConfig;

const CONFIG_FILE_NAME: &str = "replicate_config.json";

#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    temp_path: PathBuf,
}

impl ConfigFile {
    pub fn new(data_dir: &Path) -> Self {
        let metadata_dir = data_dir.join("metadata");
        Self {
            path: metadata_dir.join(CONFIG_FILE_NAME),
            temp_path: metadata_dir.join(format!("{}.tmp", CONFIG_FILE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn write_atomic(&self, config: &CommittedConfig) -> CdcResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CdcError::persistence(format!("failed to create metadata directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(config).map_err(|e| {
            CdcError::persistence(format!("failed to serialize committed config: {}", e))
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| CdcError::persistence(format!("failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .map_err(|e| CdcError::persistence(format!("failed to write config: {}", e)))?;
        file.sync_all()
            .map_err(|e| CdcError::persistence(format!("failed to fsync config: {}", e)))?;

        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| CdcError::persistence(format!("failed to rename config into place: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Read the persisted config; `None` if nothing was ever committed.
    pub fn read(&self) -> CdcResult<Option<CommittedConfig>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CdcError::persistence(format!("failed to open config: {}", e)))
            }
        };

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| CdcError::persistence(format!("failed to read config: {}", e)))?;

        let config = serde_json::from_str(&content).map_err(|e| {
            CdcError::persistence(format!(
                "corrupt committed config at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ClusterBuilder, TopologySnapshot};
    use tempfile::TempDir;

    fn config() -> CommittedConfig {
        let snapshot = TopologySnapshot::new(vec![ClusterBuilder::new("a").with_pchannel_count(3).build()], vec![])
            .unwrap();
        CommittedConfig::new(4, snapshot)
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let file = ConfigFile::new(dir.path());
        assert!(!file.exists());
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let file = ConfigFile::new(dir.path());
        file.write_atomic(&config()).unwrap();

        let back = file.read().unwrap().unwrap();
        assert_eq!(back.revision(), 4);
        assert_eq!(back.pchannels_of("a").len(), 3);
        assert!(!dir.path().join("metadata/replicate_config.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = ConfigFile::new(dir.path());
        fs::create_dir_all(dir.path().join("metadata")).unwrap();
        fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(file.read(), Err(CdcError::Persistence(_))));
    }
}
