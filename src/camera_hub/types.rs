//! CameraHub types

use super::queue::FrameQueue;
use crate::camera::{CameraDescription, FrameFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// CameraHub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum frames buffered per consumer before the oldest are dropped
    pub queue_max: usize,
    /// Discovery round timeout used by refresh
    pub discovery_timeout: Duration,
    /// Roles granted to newly registered cameras
    pub default_roles: BTreeSet<String>,
    /// Statically configured camera ids (paths/URIs), never removed by refresh
    pub custom_cameras: Vec<String>,
    /// How long a snapshot waits for a live frame
    pub snapshot_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_max: 10,
            discovery_timeout: Duration::from_millis(3000),
            default_roles: ["admin", "user"].iter().map(|r| r.to_string()).collect(),
            custom_cameras: Vec::new(),
            snapshot_timeout: Duration::from_secs(10),
        }
    }
}

/// Identity of one consumer registration
///
/// The same caller asking for two formats holds two registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerKey {
    pub camera_id: String,
    pub consumer_id: String,
    pub format: FrameFormat,
}

impl ConsumerKey {
    pub fn new(camera_id: &str, consumer_id: &str, format: &FrameFormat) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            consumer_id: consumer_id.to_string(),
            format: format.clone(),
        }
    }
}

/// Result of a successful hook
#[derive(Clone)]
pub struct HookHandle {
    pub key: ConsumerKey,
    /// Format the camera was started with
    pub negotiated: FrameFormat,
    pub queue: Arc<FrameQueue>,
    /// Fires when the camera session ends (last consumer left or capture fault)
    pub cancel: CancellationToken,
}

/// Camera listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraInfo {
    #[serde(flatten)]
    pub description: CameraDescription,
    pub allowed_roles: BTreeSet<String>,
    pub custom: bool,
    pub running: bool,
    pub consumers: usize,
}

/// What a refresh changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}
