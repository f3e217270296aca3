//! Pool State File
//!
//! Persists [`PoolState`] as pretty-printed JSON next to the drive files so
//! successive CLI invocations see the same status, mode and manifest.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::PoolState;

/// File name used inside a pool directory
pub const STATE_FILE_NAME: &str = "pool.json";

/// JSON state file of one pool
#[derive(Debug, Clone)]
pub struct PoolStateFile {
    path: PathBuf,
}

impl PoolStateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// State file inside a pool directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<PoolState> {
        if !self.exists() {
            return Err(Error::Configuration(format!(
                "no pool state at {} (run `init` first)",
                self.path.display()
            )));
        }
        let raw = fs::read_to_string(&self.path)?;
        let state: PoolState = serde_json::from_str(&raw)?;
        debug!("Loaded pool {} from {}", state.pool_id, self.path.display());
        Ok(state)
    }

    /// Write through a temporary file and rename it into place.
    pub fn save(&self, state: &PoolState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved pool {} to {}", state.pool_id, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, PoolMode};
    use crate::layout::StatusSnapshot;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("drivestor-state-{}", Uuid::new_v4()));
        let file = PoolStateFile::in_dir(&dir);
        assert!(!file.exists());
        assert!(file.load().is_err());

        let mut status = StatusSnapshot::all_online(484);
        status.set(7, false);
        let state = PoolState {
            pool_id: Uuid::new_v4(),
            config: PoolConfig::default(),
            status,
            mode: PoolMode::Ha,
            manifest: None,
            saved_at: Utc::now(),
        };
        file.save(&state).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded, state);
        assert!(!loaded.status.is_online(7));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
