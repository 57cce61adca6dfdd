//! CameraHub - camera registry and frame fan-out
//!
//! ## Responsibilities
//!
//! - Track discovered and statically configured cameras
//! - Start a camera on its first consumer, stop it on its last
//! - Fan each produced frame out to every consumer queue (newest wins)
//! - One cancellation signal per camera session, fired on stop or fault
//! - Role-gated lookup for callers
//!
//! Hook/unhook on one camera are serialized by that entry's lifecycle
//! lock; other cameras are never blocked by it.

mod queue;
mod types;

pub use queue::FrameQueue;
pub use types::*;

use crate::camera::{Camera, CameraDescription, Frame, FrameFormat, FrameSink};
use crate::codec;
use crate::discovery::{custom_description, CameraSource};
use crate::error::{Error, Result};
use crate::user_directory::UserDirectory;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Mutable per-camera session state
#[derive(Default)]
struct EntryState {
    consumers: HashMap<ConsumerKey, Arc<FrameQueue>>,
    cancel: Option<CancellationToken>,
    negotiated: FrameFormat,
    /// Bumped on every start so stale callbacks are ignored
    session: u64,
}

/// A registered camera and its consumers
pub struct HubEntry {
    camera: Arc<dyn Camera>,
    custom: bool,
    allowed_roles: Mutex<BTreeSet<String>>,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<EntryState>,
}

impl HubEntry {
    fn new(camera: Arc<dyn Camera>, custom: bool, allowed_roles: BTreeSet<String>) -> Self {
        Self {
            camera,
            custom,
            allowed_roles: Mutex::new(allowed_roles),
            lifecycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(EntryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn camera(&self) -> &Arc<dyn Camera> {
        &self.camera
    }

    pub fn description(&self) -> CameraDescription {
        self.camera.description()
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn allowed_roles(&self) -> BTreeSet<String> {
        self.allowed_roles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn consumer_count(&self) -> usize {
        self.state().consumers.len()
    }

    pub fn is_running(&self) -> bool {
        self.camera.is_running()
    }

    fn info(&self) -> CameraInfo {
        CameraInfo {
            description: self.description(),
            allowed_roles: self.allowed_roles(),
            custom: self.custom,
            running: self.camera.is_running(),
            consumers: self.consumer_count(),
        }
    }

    /// Deliver one frame to every consumer of the current session
    fn fan_out(&self, session: u64, frame: Frame) {
        let targets: Vec<(FrameFormat, Arc<FrameQueue>)> = {
            let state = self.state();
            if state.session != session || state.cancel.is_none() {
                return;
            }
            state
                .consumers
                .iter()
                .map(|(key, queue)| (key.format.clone(), queue.clone()))
                .collect()
        };

        // one resampled copy per distinct requested size
        let mut resized: HashMap<(u32, u32), Frame> = HashMap::new();
        for (format, queue) in targets {
            let wants_resize = format.has_resolution()
                && (format.width, format.height) != (frame.width(), frame.height());
            if wants_resize {
                let copy = resized
                    .entry((format.width, format.height))
                    .or_insert_with(|| {
                        frame.with_image(codec::resize(&frame.image, format.width, format.height))
                    })
                    .clone();
                queue.push(copy);
            } else {
                queue.push(frame.clone());
            }
        }
    }

    /// The running session ended on its own
    fn fault(&self, session: u64, reason: &str) {
        let (cancel, consumers) = {
            let mut state = self.state();
            if state.session != session {
                return;
            }
            let consumers: Vec<Arc<FrameQueue>> =
                state.consumers.drain().map(|(_, q)| q).collect();
            (state.cancel.take(), consumers)
        };

        tracing::warn!(
            camera_id = %self.camera.description().id,
            consumers = consumers.len(),
            reason = %reason,
            "Camera session faulted"
        );

        for queue in consumers {
            queue.drain();
        }
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    /// Undo a session whose start did not succeed
    fn reset_session(&self, session: u64) {
        let mut state = self.state();
        if state.session != session {
            return;
        }
        state.consumers.clear();
        state.cancel = None;
        state.negotiated = FrameFormat::default();
    }

    /// Drop every consumer and stop the camera
    async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        let cancel = {
            let mut state = self.state();
            for queue in state.consumers.values() {
                queue.drain();
            }
            state.consumers.clear();
            state.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
            if let Err(e) = self.camera.stop().await {
                tracing::warn!(camera_id = %self.camera.description().id, error = %e, "Camera stop failed");
            }
        }
    }
}

/// CameraHub instance
pub struct CameraHub {
    config: HubConfig,
    source: Arc<dyn CameraSource>,
    users: Arc<dyn UserDirectory>,
    entries: RwLock<HashMap<String, Arc<HubEntry>>>,
}

impl CameraHub {
    /// Create new CameraHub with an empty registry
    pub fn new(
        config: HubConfig,
        source: Arc<dyn CameraSource>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            source,
            users,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    async fn entry(&self, camera_id: &str) -> Result<Arc<HubEntry>> {
        self.entries
            .read()
            .await
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", camera_id)))
    }

    /// Run one discovery round without touching the registry
    pub async fn discover(&self, timeout: Duration) -> Vec<CameraDescription> {
        self.source.discover(timeout).await
    }

    /// Reconcile the registry with discovery plus the configured cameras
    ///
    /// Custom cameras are never removed or duplicated. Removed cameras are
    /// stopped and their consumers cancelled.
    pub async fn refresh_collection(&self) -> RefreshSummary {
        let discovered = self.discover(self.config.discovery_timeout).await;
        let custom: Vec<CameraDescription> = self
            .config
            .custom_cameras
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(|id| {
                // discovery knows the formats; the id alone does not
                discovered
                    .iter()
                    .find(|d| d.id == id)
                    .cloned()
                    .unwrap_or_else(|| custom_description(id))
            })
            .collect();
        let custom_ids: HashSet<&str> = custom.iter().map(|d| d.id.as_str()).collect();
        let discovered_ids: HashSet<&str> = discovered.iter().map(|d| d.id.as_str()).collect();

        let mut summary = RefreshSummary::default();
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.write().await;

            let candidates = custom
                .iter()
                .map(|d| (d, true))
                .chain(
                    discovered
                        .iter()
                        .filter(|d| !custom_ids.contains(d.id.as_str()))
                        .map(|d| (d, false)),
                );

            for (description, is_custom) in candidates {
                if entries.contains_key(&description.id) {
                    continue;
                }
                match self.source.open(description.clone()) {
                    Ok(camera) => {
                        let entry = HubEntry::new(camera, is_custom, self.config.default_roles.clone());
                        entries.insert(description.id.clone(), Arc::new(entry));
                        summary.added.push(description.id.clone());
                    }
                    Err(e) => {
                        tracing::warn!(camera_id = %description.id, error = %e, "Failed to open camera");
                    }
                }
            }

            let stale: Vec<String> = entries
                .iter()
                .filter(|(id, entry)| !entry.custom && !discovered_ids.contains(id.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(entry) = entries.remove(&id) {
                    removed.push(entry);
                    summary.removed.push(id);
                }
            }
        }

        for entry in removed {
            entry.close().await;
        }

        summary.added.sort();
        summary.removed.sort();
        let total = self.entries.read().await.len();
        tracing::info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            total = total,
            "Camera collection refreshed"
        );
        summary
    }

    /// Register a consumer queue, starting the camera if it is idle
    pub async fn hook_camera(
        &self,
        camera_id: &str,
        consumer_id: &str,
        format: &FrameFormat,
    ) -> Result<HookHandle> {
        let entry = self.entry(camera_id).await?;
        let _guard = entry.lifecycle.lock().await;
        let key = ConsumerKey::new(camera_id, consumer_id, format);

        {
            let mut state = entry.state();
            if let Some(cancel) = state.cancel.clone() {
                let queue = state
                    .consumers
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(FrameQueue::new(self.config.queue_max)))
                    .clone();
                tracing::debug!(
                    camera_id = %camera_id,
                    consumer_id = %consumer_id,
                    consumers = state.consumers.len(),
                    "Consumer hooked"
                );
                return Ok(HookHandle {
                    key,
                    negotiated: state.negotiated.clone(),
                    queue,
                    cancel,
                });
            }
        }

        // first consumer: publish the session before starting so a fault
        // raised while the camera starts finds the token and fires it
        let negotiated = entry.camera.negotiate_format(format);
        let cancel = CancellationToken::new();
        let queue = Arc::new(FrameQueue::new(self.config.queue_max));
        let session = {
            let mut state = entry.state();
            state.session += 1;
            state.cancel = Some(cancel.clone());
            state.negotiated = negotiated.clone();
            state.consumers.insert(key.clone(), queue.clone());
            state.session
        };

        let frame_entry: Weak<HubEntry> = Arc::downgrade(&entry);
        let fault_entry = frame_entry.clone();
        let sink = FrameSink::new(
            move |frame| {
                if let Some(entry) = frame_entry.upgrade() {
                    entry.fan_out(session, frame);
                }
            },
            move |reason| {
                if let Some(entry) = fault_entry.upgrade() {
                    entry.fault(session, reason);
                }
            },
        );

        if let Err(e) = entry.camera.start(&negotiated, sink).await {
            tracing::warn!(camera_id = %camera_id, error = %e, "Camera start failed");
            entry.reset_session(session);
            return Err(e);
        }

        if cancel.is_cancelled() {
            entry.reset_session(session);
            if let Err(e) = entry.camera.stop().await {
                tracing::debug!(camera_id = %camera_id, error = %e, "Camera stop after fault failed");
            }
            return Err(Error::capture(camera_id, "capture ended while starting"));
        }

        tracing::info!(
            camera_id = %camera_id,
            consumer_id = %consumer_id,
            format = %negotiated,
            "Camera started"
        );

        Ok(HookHandle {
            key,
            negotiated,
            queue,
            cancel,
        })
    }

    /// Remove a consumer; stops the camera when it was the last one
    ///
    /// Returns false when nothing was registered under the key.
    pub async fn unhook_camera(&self, camera_id: &str, consumer_id: &str, format: &FrameFormat) -> bool {
        let entry = match self.entry(camera_id).await {
            Ok(e) => e,
            Err(_) => return false,
        };
        let _guard = entry.lifecycle.lock().await;
        let key = ConsumerKey::new(camera_id, consumer_id, format);

        let (removed, cancel) = {
            let mut state = entry.state();
            let removed = state.consumers.remove(&key);
            let cancel = if removed.is_some() && state.consumers.is_empty() {
                state.cancel.take()
            } else {
                None
            };
            (removed, cancel)
        };

        let Some(queue) = removed else {
            return false;
        };
        queue.drain();
        tracing::debug!(camera_id = %camera_id, consumer_id = %consumer_id, "Consumer unhooked");

        if let Some(cancel) = cancel {
            cancel.cancel();
            if let Err(e) = entry.camera.stop().await {
                tracing::warn!(camera_id = %camera_id, error = %e, "Camera stop failed");
            }
            tracing::info!(camera_id = %camera_id, "Camera stopped (no consumers)");
        }
        true
    }

    /// Role-checked lookup
    pub async fn get_camera(&self, camera_id: &str, caller: &str) -> Result<Arc<HubEntry>> {
        let entry = self.entry(camera_id).await?;
        let user = self
            .users
            .user_info(caller)
            .ok_or_else(|| Error::Unauthorized(format!("Unknown user {}", caller)))?;

        if !user.has_any_role(&entry.allowed_roles()) {
            tracing::debug!(camera_id = %camera_id, user = %caller, "Camera access denied");
            return Err(Error::Unauthorized(format!(
                "User {} may not access camera {}",
                caller, camera_id
            )));
        }
        Ok(entry)
    }

    /// All registered cameras, sorted by id
    pub async fn cameras(&self) -> Vec<CameraInfo> {
        let entries: Vec<Arc<HubEntry>> = self.entries.read().await.values().cloned().collect();
        let mut infos: Vec<CameraInfo> = entries.iter().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.description.id.cmp(&b.description.id));
        infos
    }

    /// Cameras the caller may access
    pub async fn cameras_for(&self, caller: &str) -> Vec<CameraInfo> {
        let Some(user) = self.users.user_info(caller) else {
            return Vec::new();
        };
        self.cameras()
            .await
            .into_iter()
            .filter(|c| user.has_any_role(&c.allowed_roles))
            .collect()
    }

    pub async fn set_allowed_roles(&self, camera_id: &str, roles: BTreeSet<String>) -> Result<()> {
        let entry = self.entry(camera_id).await?;
        tracing::info!(camera_id = %camera_id, roles = ?roles, "Camera roles updated");
        *entry
            .allowed_roles
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = roles;
        Ok(())
    }

    pub async fn rename_camera(&self, camera_id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Camera name must not be empty".to_string()));
        }
        let entry = self.entry(camera_id).await?;
        entry.camera.rename(name);
        tracing::info!(camera_id = %camera_id, name = %name, "Camera renamed");
        Ok(())
    }

    /// One JPEG for `caller`
    ///
    /// Uses the live stream when the camera is running, otherwise grabs a
    /// single frame without starting a session.
    pub async fn snapshot(&self, camera_id: &str, caller: &str, format: &FrameFormat) -> Result<Vec<u8>> {
        let entry = self.get_camera(camera_id, caller).await?;

        let live = {
            let _guard = entry.lifecycle.lock().await;
            let running = entry.state().cancel.is_some();
            if running {
                None
            } else {
                let negotiated = entry.camera.negotiate_format(format);
                Some(entry.camera.grab_one_frame(&negotiated).await?)
            }
        };

        let frame = match live {
            Some(frame) => frame,
            None => self.next_live_frame(camera_id, format).await?,
        };

        let frame = if format.has_resolution()
            && (frame.width(), frame.height()) != (format.width, format.height)
        {
            frame.with_image(codec::resize(&frame.image, format.width, format.height))
        } else {
            frame
        };
        codec::encode_jpeg(&frame, codec::DEFAULT_JPEG_QUALITY)
    }

    async fn next_live_frame(&self, camera_id: &str, format: &FrameFormat) -> Result<Frame> {
        let consumer_id = format!("snapshot:{}", Uuid::new_v4());
        let handle = self.hook_camera(camera_id, &consumer_id, format).await?;

        let result = tokio::select! {
            _ = handle.cancel.cancelled() => None,
            frame = handle.queue.pop_timeout(self.config.snapshot_timeout) => frame,
        };

        self.unhook_camera(camera_id, &consumer_id, format).await;
        result.ok_or_else(|| Error::capture(camera_id, "No frame received for snapshot"))
    }

    /// Stop every camera and drop all consumers
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<HubEntry>> = self.entries.read().await.values().cloned().collect();
        for entry in entries {
            entry.close().await;
        }
        tracing::info!("Camera hub stopped");
    }
}
