//! Application state
//!
//! Holds the configuration and the shared services

use crate::camera_hub::{CameraHub, HubConfig};
use crate::discovery::SystemCameraSource;
use crate::error::Result;
use crate::motion_service::{LogNotifier, MotionConfig, MotionService, Notifier, WebhookNotifier};
use crate::recording_service::{FfmpegWriterFactory, RecordingConfig, RecordingService};
use crate::user_directory::StaticUserDirectory;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the persisted task lists
    pub data_dir: PathBuf,
    /// Recording root
    pub record_dir: PathBuf,
    pub discovery_timeout: Duration,
    /// Per-consumer frame queue bound
    pub queue_max: usize,
    pub record_rotate: Duration,
    pub notify_cooldown: Duration,
    /// Cameras pinned regardless of discovery
    pub custom_cameras: Vec<String>,
    /// Roles granted to newly registered cameras
    pub default_roles: BTreeSet<String>,
    /// `name:role|role;...`
    pub users: String,
    pub webhook_url: Option<String>,
    pub onvif_rtsp_path: String,
    /// Periodic collection refresh
    pub refresh_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl AppConfig {
    /// Build from an arbitrary variable lookup; unset or unparsable
    /// numbers fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let data_dir = lookup("CAMHUB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/camhub"));
        let record_dir = lookup("CAMHUB_RECORD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("records"));

        let mut default_roles: BTreeSet<String> = lookup("CAMHUB_DEFAULT_ROLES")
            .map(|v| parse_list(&v).collect())
            .unwrap_or_default();
        if default_roles.is_empty() {
            default_roles = HubConfig::default().default_roles;
        }

        Self {
            discovery_timeout: Duration::from_millis(number("CAMHUB_DISCOVERY_TIMEOUT_MS", 3000)),
            queue_max: number("CAMHUB_QUEUE_MAX", 10).max(1) as usize,
            record_rotate: Duration::from_secs(number("CAMHUB_RECORD_ROTATE_SEC", 600).max(1)),
            notify_cooldown: Duration::from_secs(number("CAMHUB_NOTIFY_COOLDOWN_SEC", 60)),
            custom_cameras: lookup("CAMHUB_CUSTOM_CAMERAS")
                .map(|v| parse_list(&v).collect())
                .unwrap_or_default(),
            default_roles,
            users: lookup("CAMHUB_USERS").unwrap_or_else(|| "admin:admin".to_string()),
            webhook_url: lookup("CAMHUB_WEBHOOK_URL").filter(|u| !u.trim().is_empty()),
            onvif_rtsp_path: lookup("CAMHUB_ONVIF_RTSP_PATH")
                .unwrap_or_else(|| "onvif1".to_string()),
            refresh_interval: Duration::from_secs(number("CAMHUB_REFRESH_INTERVAL_SEC", 60).max(1)),
            data_dir,
            record_dir,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_max: self.queue_max,
            discovery_timeout: self.discovery_timeout,
            default_roles: self.default_roles.clone(),
            custom_cameras: self.custom_cameras.clone(),
            ..HubConfig::default()
        }
    }

    pub fn recording_config(&self) -> RecordingConfig {
        RecordingConfig {
            record_dir: self.record_dir.clone(),
            rotate_interval: self.record_rotate,
            ..RecordingConfig::default()
        }
    }

    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            notify_cooldown: self.notify_cooldown,
            clip_dir: self.data_dir.join("clips"),
            ..MotionConfig::default()
        }
    }

    pub fn recording_tasks_path(&self) -> PathBuf {
        self.data_dir.join("recording_tasks.json")
    }

    pub fn motion_tasks_path(&self) -> PathBuf {
        self.data_dir.join("motion_tasks.json")
    }
}

/// Application state shared by the background loops
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub hub: Arc<CameraHub>,
    pub recording: Arc<RecordingService>,
    pub motion: Arc<MotionService>,
}

impl AppState {
    /// Wire the production services; nothing is started yet
    pub fn build(config: AppConfig) -> Result<Self> {
        let users = StaticUserDirectory::from_spec(&config.users)?;
        tracing::info!(users = users.len(), "User directory loaded");

        let hub = Arc::new(CameraHub::new(
            config.hub_config(),
            Arc::new(SystemCameraSource::new(config.onvif_rtsp_path.clone())),
            Arc::new(users),
        ));

        let recording_config = config.recording_config();
        let writers = Arc::new(FfmpegWriterFactory::new(recording_config.default_fps));
        let recording = Arc::new(RecordingService::new(
            hub.clone(),
            writers,
            config.recording_tasks_path(),
            recording_config,
        ));

        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => {
                tracing::info!(url = %url, "Webhook notifications enabled");
                Arc::new(WebhookNotifier::new(url.clone())?)
            }
            None => Arc::new(LogNotifier),
        };
        let motion = Arc::new(MotionService::new(
            hub.clone(),
            recording.clone(),
            notifier,
            config.motion_tasks_path(),
            config.motion_config(),
        ));

        Ok(Self {
            config,
            hub,
            recording,
            motion,
        })
    }

    /// Populate the registry and replay persisted tasks
    pub async fn restore(&self) {
        let summary = self.hub.refresh_collection().await;
        tracing::info!(
            added = summary.added.len(),
            "Initial camera collection loaded"
        );

        let recordings = self.recording.restore().await;
        let motion = self.motion.restore().await;
        tracing::info!(recordings, motion, "Persisted tasks restored");
    }

    /// Stop every worker, then every camera
    pub async fn shutdown(&self) {
        self.motion.shutdown().await;
        self.recording.shutdown().await;
        self.hub.shutdown().await;
    }
}
