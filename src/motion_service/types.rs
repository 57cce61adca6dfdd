//! MotionService types

use crate::camera::FrameFormat;
use crate::error::{Error, Result};
use crate::task_store::{derive_task_id, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// MotionService configuration
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Queue wait per loop iteration
    pub poll_interval: Duration,
    /// Wait before re-hooking after the camera session ended
    pub retry_delay: Duration,
    /// How long `stop` waits for the worker to finish
    pub stop_timeout: Duration,
    /// Minimum gap between two notifications of one kind to one target
    pub notify_cooldown: Duration,
    /// Raw frames kept as video pre-roll
    pub prebuffer_frames: usize,
    /// Live part of a video notification
    pub clip_duration: Duration,
    /// Where video notification clips are written
    pub clip_dir: PathBuf,
    /// Keep clips on disk after sending
    pub keep_clips: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            retry_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            notify_cooldown: Duration::from_secs(60),
            prebuffer_frames: 30,
            clip_duration: Duration::from_secs(5),
            clip_dir: PathBuf::from("/var/lib/camhub/clips"),
            keep_clips: false,
        }
    }
}

/// Frame differencing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionParameters {
    /// Minimum time between two processed frames
    pub delay_ms: u64,
    /// Comparison size
    pub width: u32,
    pub height: u32,
    /// Per-pixel difference below this is noise
    pub noise_threshold: u8,
    /// Smallest changed region (pixels) that counts as motion
    pub change_limit: u32,
}

impl Default for MotionParameters {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            width: 320,
            height: 240,
            noise_threshold: 25,
            change_limit: 500,
        }
    }
}

impl MotionParameters {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Validation("width and height must be positive".to_string()));
        }
        if self.change_limit == 0 {
            return Err(Error::Validation("change_limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Notification payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Text,
    Image,
    Video,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// Where detections are reported
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Chat id, webhook name or similar
    pub destination: String,
    /// Transport channel (e.g. "telegram", "webhook")
    pub channel: String,
    pub kinds: Vec<NotificationKind>,
}

impl NotificationTarget {
    pub fn new(
        destination: impl Into<String>,
        channel: impl Into<String>,
        kinds: impl IntoIterator<Item = NotificationKind>,
    ) -> Self {
        Self {
            destination: destination.into(),
            channel: channel.into(),
            kinds: kinds.into_iter().collect(),
        }
    }

    fn same_endpoint(&self, other: &Self) -> bool {
        self.destination == other.destination && self.channel == other.channel
    }
}

/// Persisted detection task configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    pub camera_id: String,
    pub user: String,
    #[serde(default)]
    pub format: FrameFormat,
    #[serde(default)]
    pub parameters: MotionParameters,
    #[serde(default)]
    pub targets: Vec<NotificationTarget>,
}

impl MotionSettings {
    pub fn new(camera_id: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            user: user.into(),
            format: FrameFormat::unknown(),
            parameters: MotionParameters::default(),
            targets: Vec::new(),
        }
    }

    /// One detector per camera and user
    pub fn task_id(&self) -> String {
        derive_task_id("motion", &[&self.camera_id, &self.user])
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(Error::Validation("camera_id is required".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(Error::Validation("user is required".to_string()));
        }
        self.parameters.validate()
    }

    /// Add `targets` not already present; kinds of an existing endpoint are
    /// unioned. Returns true if anything changed.
    pub fn merge_targets(&mut self, targets: &[NotificationTarget]) -> bool {
        let mut changed = false;
        for target in targets {
            match self.targets.iter_mut().find(|t| t.same_endpoint(target)) {
                Some(existing) => {
                    for kind in &target.kinds {
                        if !existing.kinds.contains(kind) {
                            existing.kinds.push(*kind);
                            changed = true;
                        }
                    }
                }
                None => {
                    self.targets.push(target.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Task listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionTask {
    pub task_id: String,
    pub settings: MotionSettings,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub detections: u64,
    pub last_detection_at: Option<DateTime<Utc>>,
}
