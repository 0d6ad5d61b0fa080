//! File-backed PoA period marker
//!
//! Stores `{"last_period": N}` as JSON. Writes go to a temp file that is
//! synced and renamed over the marker, so a crash leaves either the old or
//! the new value on disk.

use crate::error::{MiningError, Result};
use crate::ports::outbound::PeriodMarkerStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    last_period: u64,
}

/// Period marker persisted to disk
pub struct FilePeriodMarker {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePeriodMarker {
    /// Create a marker stored at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            info!("[forge] using period marker at {}", path.display());
        }
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Marker location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: std::io::Error) -> MiningError {
        MiningError::PeriodMarker(format!("{}: {}", self.path.display(), e))
    }
}

impl PeriodMarkerStore for FilePeriodMarker {
    fn last_produced(&self) -> Result<Option<u64>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let marker: MarkerFile = serde_json::from_slice(&bytes)
            .map_err(|e| MiningError::PeriodMarker(format!("corrupt marker: {}", e)))?;
        Ok(Some(marker.last_period))
    }

    fn record(&self, period: u64) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(last) = self.last_produced()? {
            if last >= period {
                return Ok(());
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let bytes = serde_json::to_vec(&MarkerFile {
            last_period: period,
        })
        .map_err(|e| MiningError::PeriodMarker(e.to_string()))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).map_err(|e| self.io_error(e))?;
        file.write_all(&bytes).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| self.io_error(e))?;

        Ok(())
    }
}
