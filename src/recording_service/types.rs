//! RecordingService types

use crate::camera::FrameFormat;
use crate::error::{Error, Result};
use crate::task_store::{derive_task_id, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// RecordingService configuration
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Root directory for recordings (one subdirectory per camera)
    pub record_dir: PathBuf,
    /// Close the current file and open a new one after this long
    pub rotate_interval: Duration,
    /// Queue wait per loop iteration
    pub poll_interval: Duration,
    /// Wait before re-hooking after the camera session ended
    pub retry_delay: Duration,
    /// How long `stop` waits for the worker to finish
    pub stop_timeout: Duration,
    /// Output frame rate when the camera does not report one
    pub default_fps: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            record_dir: PathBuf::from("/var/lib/camhub/records"),
            rotate_interval: Duration::from_secs(600),
            poll_interval: Duration::from_millis(200),
            retry_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            default_fps: 15.0,
        }
    }
}

/// Persisted recording task configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub camera_id: String,
    pub user: String,
    pub format: FrameFormat,
}

impl RecordingSettings {
    pub fn new(camera_id: impl Into<String>, user: impl Into<String>, format: FrameFormat) -> Self {
        Self {
            camera_id: camera_id.into(),
            user: user.into(),
            format,
        }
    }

    /// Same camera, user and size always map to the same id
    pub fn task_id(&self) -> String {
        let size = format!("{}x{}", self.format.width, self.format.height);
        derive_task_id("record", &[&self.camera_id, &self.user, &size])
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(Error::Validation("camera_id is required".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(Error::Validation("user is required".to_string()));
        }
        Ok(())
    }
}

/// Task listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingTask {
    pub task_id: String,
    pub settings: RecordingSettings,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub files_written: u64,
}
