//! Routing checkpoint persistence.
//!
//! A routing pass records the last change it routed and the last batch id it
//! allocated, so the next pass resumes after that change and continues the
//! batch id sequence instead of reusing ids.
//!
//! # Example
//!
//! ```rust,no_run
//! use sync_relay::checkpoint::{CheckpointManager, RoutingCheckpoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new("routing.json");
//!
//!     if let Some(checkpoint) = manager.load().await? {
//!         println!("Resuming after change {}", checkpoint.last_change_id);
//!     }
//!
//!     manager.save(&RoutingCheckpoint::new(1200, 37)).await?;
//!     Ok(())
//! }
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

/// Position of the capture cursor after a routing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingCheckpoint {
    /// Highest change id that has been routed
    pub last_change_id: u64,
    /// Highest batch id that has been allocated
    pub last_batch_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl RoutingCheckpoint {
    /// Creates a checkpoint stamped with the current time.
    ///
    /// ```rust
    /// use sync_relay::checkpoint::RoutingCheckpoint;
    ///
    /// let checkpoint = RoutingCheckpoint::new(1200, 37);
    /// assert_eq!(checkpoint.last_change_id, 1200);
    /// assert_eq!(checkpoint.last_batch_id, 37);
    /// ```
    pub fn new(last_change_id: u64, last_batch_id: u64) -> Self {
        Self {
            last_change_id,
            last_batch_id,
            timestamp: Utc::now(),
        }
    }
}

/// Reads and writes a [`RoutingCheckpoint`] as JSON.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// checkpoint, so a crash mid-write leaves the previous checkpoint intact.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    /// Loads the checkpoint, or `None` on a first run.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or is not a valid
    /// checkpoint.
    pub async fn load(&self) -> Result<Option<RoutingCheckpoint>> {
        if !self.file_path.exists() {
            debug!("No checkpoint file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).await.map_err(|e| {
            error!("Failed to read checkpoint file: {}", e);
            Error::checkpoint(&self.file_path, format!("read failed: {}", e))
        })?;

        match serde_json::from_str::<RoutingCheckpoint>(&content) {
            Ok(checkpoint) => {
                info!(
                    last_change_id = checkpoint.last_change_id,
                    last_batch_id = checkpoint.last_batch_id,
                    timestamp = %checkpoint.timestamp,
                    "Loaded checkpoint"
                );
                Ok(Some(checkpoint))
            }
            Err(e) => {
                error!("Failed to parse checkpoint file: {}", e);
                Err(Error::checkpoint(&self.file_path, format!("invalid checkpoint: {}", e)))
            }
        }
    }

    /// Saves the checkpoint atomically (temp file, sync, rename).
    pub async fn save(&self, checkpoint: &RoutingCheckpoint) -> Result<()> {
        debug!(
            last_change_id = checkpoint.last_change_id,
            last_batch_id = checkpoint.last_batch_id,
            "Saving checkpoint"
        );

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;

        debug!("Checkpoint saved");
        Ok(())
    }

    /// Removes the checkpoint so the next pass starts from the first change.
    pub async fn delete(&self) -> Result<()> {
        if self.file_path.exists() {
            fs::remove_file(&self.file_path).await?;
            info!("Deleted checkpoint file");
        }
        Ok(())
    }
}
