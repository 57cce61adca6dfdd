//! MotionService - motion detection tasks
//!
//! ## Responsibilities
//!
//! - One detector per (camera, user); a second start merges its
//!   notification targets into the running task
//! - Frame differencing on hub frames, rate-limited per task
//! - Throttled text/image/video notifications per target
//! - Video clips recorded through the recording service, with the rolling
//!   frame buffer as pre-roll
//! - Persist the task list on every start/stop, replay it on restart

mod detector;
mod notifier;
mod throttle;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::{largest_changed_region, Detection, MotionDetector};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use throttle::NotificationThrottle;
pub use types::*;

use crate::camera::Frame;
use crate::camera_hub::{CameraHub, HookHandle};
use crate::codec;
use crate::error::{Error, Result};
use crate::recording_service::{recording_path, ClipRequest, RecordingService};
use crate::task_store::{TaskStatus, TaskStore};
use crate::user_directory::DEFAULT_CODEC;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Settings shared between the service and a running worker
type SharedSettings = Arc<std::sync::RwLock<MotionSettings>>;

fn read_settings(settings: &SharedSettings) -> MotionSettings {
    settings
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[derive(Default)]
struct TaskProgress {
    live: AtomicBool,
    detections: AtomicU64,
    last_detection: std::sync::Mutex<Option<DateTime<Utc>>>,
}

struct ActiveTask {
    settings: SharedSettings,
    started_at: DateTime<Utc>,
    stop: CancellationToken,
    progress: Arc<TaskProgress>,
    join: JoinHandle<()>,
}

/// MotionService instance
pub struct MotionService {
    hub: Arc<CameraHub>,
    recording: Arc<RecordingService>,
    notifier: Arc<dyn Notifier>,
    store: TaskStore<MotionSettings>,
    config: MotionConfig,
    tasks: RwLock<HashMap<String, ActiveTask>>,
    ops: Mutex<()>,
}

impl MotionService {
    /// Create new MotionService
    pub fn new(
        hub: Arc<CameraHub>,
        recording: Arc<RecordingService>,
        notifier: Arc<dyn Notifier>,
        store_path: impl Into<PathBuf>,
        config: MotionConfig,
    ) -> Self {
        Self {
            hub,
            recording,
            notifier,
            store: TaskStore::new(store_path),
            config,
            tasks: RwLock::new(HashMap::new()),
            ops: Mutex::new(()),
        }
    }

    /// Start detection, or merge targets into the running task
    pub async fn start(&self, settings: MotionSettings) -> Result<String> {
        settings.validate()?;
        self.hub
            .get_camera(&settings.camera_id, &settings.user)
            .await?;

        let task_id = settings.task_id();
        let _ops = self.ops.lock().await;

        let existing = self
            .tasks
            .read()
            .await
            .get(&task_id)
            .map(|t| t.settings.clone());
        if let Some(shared) = existing {
            let changed = shared
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .merge_targets(&settings.targets);
            if changed {
                tracing::info!(task_id = %task_id, "Notification targets merged into motion task");
                self.persist().await;
            }
            return Ok(task_id);
        }

        let handle = self
            .hub
            .hook_camera(&settings.camera_id, &task_id, &settings.format)
            .await?;

        tracing::info!(
            task_id = %task_id,
            camera_id = %settings.camera_id,
            user = %settings.user,
            targets = settings.targets.len(),
            "Motion task started"
        );
        self.spawn_task(task_id.clone(), settings, Some(handle)).await;
        self.persist().await;

        Ok(task_id)
    }

    /// Stop a task, release its camera and persist the new list
    pub async fn stop(&self, task_id: &str) -> Result<()> {
        let _ops = self.ops.lock().await;
        let task = self
            .tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| Error::NotFound(format!("Motion task {} not found", task_id)))?;

        self.finish_task(task_id, task).await;
        self.persist().await;

        tracing::info!(task_id = %task_id, "Motion task stopped");
        Ok(())
    }

    /// Active tasks sorted by id
    pub async fn tasks(&self) -> Vec<MotionTask> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<MotionTask> = tasks
            .iter()
            .map(|(id, task)| MotionTask {
                task_id: id.clone(),
                settings: read_settings(&task.settings),
                status: if task.progress.live.load(Ordering::Relaxed) {
                    TaskStatus::Running
                } else {
                    TaskStatus::Waiting
                },
                started_at: task.started_at,
                detections: task.progress.detections.load(Ordering::Relaxed),
                last_detection_at: *task
                    .progress
                    .last_detection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            })
            .collect();
        list.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        list
    }

    /// Replay the persisted task list; returns how many tasks were started
    pub async fn restore(&self) -> usize {
        let records = match self.store.load().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %self.store.path().display(), error = %e, "Failed to load motion tasks");
                return 0;
            }
        };

        let _ops = self.ops.lock().await;
        let mut restored = 0;
        for settings in records {
            if let Err(e) = settings.validate() {
                let e = Error::Config(format!("invalid motion task: {}", e));
                tracing::warn!(camera_id = %settings.camera_id, error = %e, "Skipping persisted task");
                continue;
            }

            let task_id = settings.task_id();
            if self.tasks.read().await.contains_key(&task_id) {
                continue;
            }

            let handle = match self
                .hub
                .hook_camera(&settings.camera_id, &task_id, &settings.format)
                .await
            {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Camera unavailable, task will retry");
                    None
                }
            };
            self.spawn_task(task_id, settings, handle).await;
            restored += 1;
        }

        tracing::info!(count = restored, "Motion tasks restored");
        restored
    }

    /// Stop all workers without touching the persisted list
    pub async fn shutdown(&self) {
        let _ops = self.ops.lock().await;
        let tasks: Vec<(String, ActiveTask)> = self.tasks.write().await.drain().collect();
        for (task_id, task) in tasks {
            self.finish_task(&task_id, task).await;
        }
        tracing::info!("Motion service stopped");
    }

    async fn spawn_task(&self, task_id: String, settings: MotionSettings, handle: Option<HookHandle>) {
        let codec = self
            .hub
            .users()
            .user_info(&settings.user)
            .map(|u| u.default_codec)
            .unwrap_or_else(|| DEFAULT_CODEC.to_string());

        let shared: SharedSettings = Arc::new(std::sync::RwLock::new(settings));
        let stop = CancellationToken::new();
        let progress = Arc::new(TaskProgress::default());
        let worker = MotionWorker {
            task_id: task_id.clone(),
            settings: shared.clone(),
            codec,
            hub: self.hub.clone(),
            recording: self.recording.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
            stop: stop.clone(),
            progress: progress.clone(),
            throttle: NotificationThrottle::new(self.config.notify_cooldown),
        };
        let join = tokio::spawn(worker.run(handle));

        self.tasks.write().await.insert(
            task_id,
            ActiveTask {
                settings: shared,
                started_at: Utc::now(),
                stop,
                progress,
                join,
            },
        );
    }

    async fn finish_task(&self, task_id: &str, task: ActiveTask) {
        task.stop.cancel();
        let abort = task.join.abort_handle();
        if tokio::time::timeout(self.config.stop_timeout, task.join)
            .await
            .is_err()
        {
            tracing::warn!(task_id = %task_id, "Motion worker did not stop in time, aborting");
            abort.abort();
        }
        let settings = read_settings(&task.settings);
        self.hub
            .unhook_camera(&settings.camera_id, task_id, &settings.format)
            .await;
    }

    async fn persist(&self) {
        let tasks = &self.tasks;
        let result = self
            .store
            .save_with(move || async move {
                let tasks = tasks.read().await;
                let mut records: Vec<(&String, &ActiveTask)> = tasks.iter().collect();
                records.sort_by(|a, b| a.0.cmp(b.0));
                records
                    .into_iter()
                    .map(|(_, t)| read_settings(&t.settings))
                    .collect()
            })
            .await;

        if let Err(e) = result {
            tracing::error!(path = %self.store.path().display(), error = %e, "Failed to persist motion tasks");
        }
    }
}

/// Per-task detection loop
struct MotionWorker {
    task_id: String,
    settings: SharedSettings,
    codec: String,
    hub: Arc<CameraHub>,
    recording: Arc<RecordingService>,
    notifier: Arc<dyn Notifier>,
    config: MotionConfig,
    stop: CancellationToken,
    progress: Arc<TaskProgress>,
    throttle: NotificationThrottle,
}

impl MotionWorker {
    async fn run(mut self, mut handle: Option<HookHandle>) {
        let settings = read_settings(&self.settings);
        loop {
            let current = match handle.take() {
                Some(h) => h,
                None => match self
                    .hub
                    .hook_camera(&settings.camera_id, &self.task_id, &settings.format)
                    .await
                {
                    Ok(h) => {
                        tracing::info!(task_id = %self.task_id, "Motion task re-hooked camera");
                        h
                    }
                    Err(e) => {
                        tracing::debug!(task_id = %self.task_id, error = %e, "Re-hook failed");
                        if self.wait_retry().await {
                            continue;
                        }
                        break;
                    }
                },
            };

            self.progress.live.store(true, Ordering::Relaxed);
            self.detect(&current, &settings.parameters).await;
            self.progress.live.store(false, Ordering::Relaxed);

            current.queue.drain();
            self.hub
                .unhook_camera(&settings.camera_id, &self.task_id, &settings.format)
                .await;

            if self.stop.is_cancelled() {
                break;
            }
            tracing::warn!(
                task_id = %self.task_id,
                camera_id = %settings.camera_id,
                "Camera session ended, detection will retry"
            );
            if !self.wait_retry().await {
                break;
            }
        }
        tracing::debug!(task_id = %self.task_id, "Motion worker exited");
    }

    async fn wait_retry(&self) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_delay) => true,
        }
    }

    async fn detect(&mut self, handle: &HookHandle, parameters: &MotionParameters) {
        let mut detector = MotionDetector::new(parameters.clone());
        let mut prebuffer: VecDeque<Frame> = VecDeque::with_capacity(self.config.prebuffer_frames);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = handle.cancel.cancelled() => break,
                frame = handle.queue.pop_timeout(self.config.poll_interval) => frame,
            };
            let Some(frame) = frame else {
                continue;
            };

            if self.config.prebuffer_frames > 0 {
                if prebuffer.len() >= self.config.prebuffer_frames {
                    prebuffer.pop_front();
                }
                prebuffer.push_back(frame.clone());
            }

            let detection = detector.process(&frame, std::time::Instant::now());
            if let Detection::Processed {
                motion: true,
                largest_region,
            } = detection
            {
                self.progress.detections.fetch_add(1, Ordering::Relaxed);
                *self
                    .progress
                    .last_detection
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(frame.captured_at);
                tracing::info!(
                    task_id = %self.task_id,
                    largest_region = largest_region,
                    "Motion detected"
                );
                self.notify(&frame, &prebuffer).await;
            }
        }
    }

    async fn caption(&self, camera_id: &str, user: &str, at: DateTime<Utc>) -> String {
        let name = match self.hub.get_camera(camera_id, user).await {
            Ok(entry) => entry.description().name,
            Err(_) => camera_id.to_string(),
        };
        format!("Motion detected on {} at {}", name, at.format("%Y-%m-%d %H:%M:%S UTC"))
    }

    async fn notify(&mut self, frame: &Frame, prebuffer: &VecDeque<Frame>) {
        let settings = read_settings(&self.settings);
        let now = std::time::Instant::now();
        self.throttle.prune(now);

        let mut texts = Vec::new();
        let mut images = Vec::new();
        let mut videos = Vec::new();
        for target in &settings.targets {
            for kind in &target.kinds {
                if !self
                    .throttle
                    .try_acquire(&target.destination, &target.channel, *kind, now)
                {
                    tracing::trace!(task_id = %self.task_id, destination = %target.destination, kind = kind.as_str(), "Notification throttled");
                    continue;
                }
                match kind {
                    NotificationKind::Text => texts.push(target.clone()),
                    NotificationKind::Image => images.push(target.clone()),
                    NotificationKind::Video => videos.push(target.clone()),
                }
            }
        }
        if texts.is_empty() && images.is_empty() && videos.is_empty() {
            return;
        }

        let caption = self
            .caption(&settings.camera_id, &settings.user, frame.captured_at)
            .await;

        for target in &texts {
            if let Err(e) = self.notifier.send_text(target, &caption).await {
                tracing::warn!(task_id = %self.task_id, destination = %target.destination, error = %e, "Text notification failed");
            }
        }

        if !images.is_empty() {
            match codec::encode_jpeg(frame, codec::DEFAULT_JPEG_QUALITY) {
                Ok(jpeg) => {
                    for target in &images {
                        if let Err(e) = self.notifier.send_image(target, &caption, &jpeg).await {
                            tracing::warn!(task_id = %self.task_id, destination = %target.destination, error = %e, "Image notification failed");
                        }
                    }
                }
                Err(e) => tracing::warn!(task_id = %self.task_id, error = %e, "Failed to encode notification image"),
            }
        }

        if !videos.is_empty() {
            let request = ClipRequest {
                camera_id: settings.camera_id.clone(),
                consumer_id: format!("{}:clip:{}", self.task_id, Uuid::new_v4()),
                format: settings.format.clone(),
                duration: self.config.clip_duration,
                prebuffer: prebuffer.iter().cloned().collect(),
                path: recording_path(
                    &self.config.clip_dir,
                    &settings.camera_id,
                    frame.captured_at,
                    self.recording.file_extension(),
                ),
                codec: self.codec.clone(),
            };
            // detection keeps running while the clip records
            tokio::spawn(send_clip(
                self.task_id.clone(),
                self.recording.clone(),
                self.notifier.clone(),
                request,
                videos,
                caption,
                self.config.keep_clips,
            ));
        }
    }
}

async fn send_clip(
    task_id: String,
    recording: Arc<RecordingService>,
    notifier: Arc<dyn Notifier>,
    request: ClipRequest,
    targets: Vec<NotificationTarget>,
    caption: String,
    keep: bool,
) {
    let path = match recording.record_video_file(&request).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "Notification clip failed");
            return;
        }
    };

    for target in &targets {
        if let Err(e) = notifier.send_video(target, &caption, &path).await {
            tracing::warn!(task_id = %task_id, destination = %target.destination, error = %e, "Video notification failed");
        }
    }

    if !keep {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!(task_id = %task_id, path = %path.display(), error = %e, "Clip cleanup failed");
        }
    }
}
