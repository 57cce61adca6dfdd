//! RecordingService - continuous recording tasks
//!
//! ## Responsibilities
//!
//! - One worker per (camera, user, size), deduplicated by task id
//! - Write hub frames into files rotated every `rotate_interval`
//! - Re-hook after the camera session ends until the task is stopped
//! - Persist the task list on every start/stop, replay it on restart
//! - Bounded one-off clips (`record_video_file`) for notifications

mod types;
mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use writer::{
    encoder_for, ffmpeg_writer_args, recording_path, sanitize_camera_id, FfmpegWriterFactory,
    VideoWriter, VideoWriterFactory,
};

use crate::camera::{Frame, FrameFormat};
use crate::camera_hub::{CameraHub, HookHandle};
use crate::error::{Error, Result};
use crate::task_store::{TaskStatus, TaskStore};
use crate::user_directory::DEFAULT_CODEC;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Queue wait used while recording a bounded clip
const CLIP_POLL: Duration = Duration::from_millis(200);

/// One bounded recording
#[derive(Debug, Clone)]
pub struct ClipRequest {
    pub camera_id: String,
    pub consumer_id: String,
    pub format: FrameFormat,
    pub duration: Duration,
    /// Written before any live frame
    pub prebuffer: Vec<Frame>,
    pub path: PathBuf,
    pub codec: String,
}

/// Format handed to a writer: requested size when given, camera rate
fn output_format(requested: &FrameFormat, negotiated: &FrameFormat) -> FrameFormat {
    if requested.has_resolution() {
        FrameFormat::new(
            requested.width,
            requested.height,
            negotiated.pixel_format.as_str(),
            negotiated.fps,
        )
    } else {
        negotiated.clone()
    }
}

/// Record `request.duration` of live frames (after the prebuffer) into one file
///
/// Hooks the camera for the duration of the clip; ends early if the camera
/// session is cancelled.
pub async fn record_video_file(
    hub: &CameraHub,
    writers: &dyn VideoWriterFactory,
    request: &ClipRequest,
) -> Result<PathBuf> {
    let handle = hub
        .hook_camera(&request.camera_id, &request.consumer_id, &request.format)
        .await?;
    let result = write_clip(writers, &handle, request).await;
    hub.unhook_camera(&request.camera_id, &request.consumer_id, &request.format)
        .await;

    match &result {
        Ok(path) => tracing::info!(camera_id = %request.camera_id, path = %path.display(), "Clip recorded"),
        Err(e) => tracing::warn!(camera_id = %request.camera_id, error = %e, "Clip recording failed"),
    }
    result
}

async fn write_clip(
    writers: &dyn VideoWriterFactory,
    handle: &HookHandle,
    request: &ClipRequest,
) -> Result<PathBuf> {
    let format = output_format(&request.format, &handle.negotiated);
    let mut writer = writers.open(&request.path, &format, &request.codec).await?;

    for frame in &request.prebuffer {
        writer.write(frame).await?;
    }

    let deadline = Instant::now() + request.duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::select! {
            _ = handle.cancel.cancelled() => break,
            frame = handle.queue.pop_timeout(remaining.min(CLIP_POLL)) => {
                if let Some(frame) = frame {
                    writer.write(&frame).await?;
                }
            }
        }
    }

    writer.close().await
}

#[derive(Default)]
struct TaskProgress {
    live: AtomicBool,
    files: AtomicU64,
}

struct ActiveTask {
    settings: RecordingSettings,
    started_at: DateTime<Utc>,
    stop: CancellationToken,
    progress: Arc<TaskProgress>,
    join: JoinHandle<()>,
}

/// RecordingService instance
pub struct RecordingService {
    hub: Arc<CameraHub>,
    writers: Arc<dyn VideoWriterFactory>,
    store: TaskStore<RecordingSettings>,
    config: RecordingConfig,
    tasks: RwLock<HashMap<String, ActiveTask>>,
    /// Serializes start/stop/restore
    ops: Mutex<()>,
}

impl RecordingService {
    /// Create new RecordingService
    ///
    /// Tasks are not started until [`restore`](Self::restore) or
    /// [`start`](Self::start) is called.
    pub fn new(
        hub: Arc<CameraHub>,
        writers: Arc<dyn VideoWriterFactory>,
        store_path: impl Into<PathBuf>,
        config: RecordingConfig,
    ) -> Self {
        Self {
            hub,
            writers,
            store: TaskStore::new(store_path),
            config,
            tasks: RwLock::new(HashMap::new()),
            ops: Mutex::new(()),
        }
    }

    /// Start recording; returns the existing id if already recording
    pub async fn start(&self, settings: RecordingSettings) -> Result<String> {
        settings.validate()?;
        self.hub
            .get_camera(&settings.camera_id, &settings.user)
            .await?;

        let task_id = settings.task_id();
        let _ops = self.ops.lock().await;

        if self.tasks.read().await.contains_key(&task_id) {
            tracing::debug!(task_id = %task_id, "Recording task already running");
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
            format = %settings.format,
            "Recording task started"
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
            .ok_or_else(|| Error::NotFound(format!("Recording task {} not found", task_id)))?;

        self.finish_task(task_id, task).await;
        self.persist().await;

        tracing::info!(task_id = %task_id, "Recording task stopped");
        Ok(())
    }

    /// Active tasks sorted by id
    pub async fn tasks(&self) -> Vec<RecordingTask> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<RecordingTask> = tasks
            .iter()
            .map(|(id, task)| RecordingTask {
                task_id: id.clone(),
                settings: task.settings.clone(),
                status: if task.progress.live.load(Ordering::Relaxed) {
                    TaskStatus::Running
                } else {
                    TaskStatus::Waiting
                },
                started_at: task.started_at,
                files_written: task.progress.files.load(Ordering::Relaxed),
            })
            .collect();
        list.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        list
    }

    /// Replay the persisted task list; returns how many tasks were started
    ///
    /// Invalid records are skipped. A camera that is not available yet does
    /// not drop the task: its worker keeps retrying.
    pub async fn restore(&self) -> usize {
        let records = match self.store.load().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %self.store.path().display(), error = %e, "Failed to load recording tasks");
                return 0;
            }
        };

        let _ops = self.ops.lock().await;
        let mut restored = 0;
        for settings in records {
            if let Err(e) = settings.validate() {
                let e = Error::Config(format!("invalid recording task: {}", e));
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

        tracing::info!(count = restored, "Recording tasks restored");
        restored
    }

    /// Stop all workers without touching the persisted list
    pub async fn shutdown(&self) {
        let _ops = self.ops.lock().await;
        let tasks: Vec<(String, ActiveTask)> = self.tasks.write().await.drain().collect();
        for (task_id, task) in tasks {
            self.finish_task(&task_id, task).await;
        }
        tracing::info!("Recording service stopped");
    }

    /// Bounded clip through this service's hub and writers
    pub async fn record_video_file(&self, request: &ClipRequest) -> Result<PathBuf> {
        record_video_file(&self.hub, self.writers.as_ref(), request).await
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Extension of the files this service writes
    pub fn file_extension(&self) -> &str {
        self.writers.extension()
    }

    async fn spawn_task(&self, task_id: String, settings: RecordingSettings, handle: Option<HookHandle>) {
        let codec = self
            .hub
            .users()
            .user_info(&settings.user)
            .map(|u| u.default_codec)
            .unwrap_or_else(|| DEFAULT_CODEC.to_string());

        let stop = CancellationToken::new();
        let progress = Arc::new(TaskProgress::default());
        let worker = RecordingWorker {
            task_id: task_id.clone(),
            settings: settings.clone(),
            codec,
            hub: self.hub.clone(),
            writers: self.writers.clone(),
            config: self.config.clone(),
            stop: stop.clone(),
            progress: progress.clone(),
        };
        let join = tokio::spawn(worker.run(handle));

        self.tasks.write().await.insert(
            task_id,
            ActiveTask {
                settings,
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
            tracing::warn!(task_id = %task_id, "Recording worker did not stop in time, aborting");
            abort.abort();
        }
        self.hub
            .unhook_camera(&task.settings.camera_id, task_id, &task.settings.format)
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
                records.into_iter().map(|(_, t)| t.settings.clone()).collect()
            })
            .await;

        if let Err(e) = result {
            tracing::error!(path = %self.store.path().display(), error = %e, "Failed to persist recording tasks");
        }
    }
}

/// Per-task recording loop
struct RecordingWorker {
    task_id: String,
    settings: RecordingSettings,
    codec: String,
    hub: Arc<CameraHub>,
    writers: Arc<dyn VideoWriterFactory>,
    config: RecordingConfig,
    stop: CancellationToken,
    progress: Arc<TaskProgress>,
}

impl RecordingWorker {
    async fn run(self, mut handle: Option<HookHandle>) {
        loop {
            let current = match handle.take() {
                Some(h) => h,
                None => match self
                    .hub
                    .hook_camera(&self.settings.camera_id, &self.task_id, &self.settings.format)
                    .await
                {
                    Ok(h) => {
                        tracing::info!(task_id = %self.task_id, "Recording task re-hooked camera");
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
            self.record(&current).await;
            self.progress.live.store(false, Ordering::Relaxed);

            current.queue.drain();
            self.hub
                .unhook_camera(&self.settings.camera_id, &self.task_id, &self.settings.format)
                .await;

            if self.stop.is_cancelled() {
                break;
            }
            tracing::warn!(
                task_id = %self.task_id,
                camera_id = %self.settings.camera_id,
                "Camera session ended, recording will retry"
            );
            if !self.wait_retry().await {
                break;
            }
        }
        tracing::debug!(task_id = %self.task_id, "Recording worker exited");
    }

    /// False when the task was stopped while waiting
    async fn wait_retry(&self) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => false,
            _ = tokio::time::sleep(self.config.retry_delay) => true,
        }
    }

    async fn record(&self, handle: &HookHandle) {
        let format = output_format(&self.settings.format, &handle.negotiated);
        let mut writer: Option<Box<dyn VideoWriter>> = None;
        let mut opened_at = Instant::now();
        let mut next_open = Instant::now();

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

            if writer.is_some() && opened_at.elapsed() >= self.config.rotate_interval {
                if let Some(current) = writer.take() {
                    self.finish(current).await;
                }
            }

            if writer.is_none() {
                if Instant::now() < next_open {
                    continue;
                }
                let path = recording_path(
                    &self.config.record_dir,
                    &self.settings.camera_id,
                    Utc::now(),
                    self.writers.extension(),
                );
                match self.writers.open(&path, &format, &self.codec).await {
                    Ok(w) => {
                        tracing::info!(task_id = %self.task_id, path = %path.display(), "Recording file opened");
                        writer = Some(w);
                        opened_at = Instant::now();
                    }
                    Err(e) => {
                        tracing::warn!(task_id = %self.task_id, error = %e, "Failed to open recording file");
                        next_open = Instant::now() + self.config.retry_delay;
                        continue;
                    }
                }
            }

            if let Some(w) = writer.as_mut() {
                if let Err(e) = w.write(&frame).await {
                    tracing::warn!(task_id = %self.task_id, error = %e, "Frame write failed");
                }
            }
        }

        if let Some(current) = writer.take() {
            self.finish(current).await;
        }
    }

    async fn finish(&self, writer: Box<dyn VideoWriter>) {
        match writer.close().await {
            Ok(path) => {
                self.progress.files.fetch_add(1, Ordering::Relaxed);
                tracing::info!(task_id = %self.task_id, path = %path.display(), "Recording file closed");
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Failed to close recording file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryWriterFactory;
    use super::*;
    use crate::camera::Camera;
    use crate::discovery::testing::FakeSource;
    use crate::testing::{eventually, temp_dir, test_hub};
    use image::RgbImage;

    struct Fixture {
        hub: Arc<CameraHub>,
        source: Arc<FakeSource>,
        writers: Arc<MemoryWriterFactory>,
        store_path: PathBuf,
        service: RecordingService,
    }

    fn config() -> RecordingConfig {
        RecordingConfig {
            record_dir: PathBuf::from("/rec"),
            poll_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(2),
            ..RecordingConfig::default()
        }
    }

    async fn fixture_with(config: RecordingConfig) -> Fixture {
        let (hub, source) = test_hub(&["/dev/video0", "/dev/video2"]).await;
        let writers = Arc::new(MemoryWriterFactory::default());
        let store_path = temp_dir("recording").join("recording_tasks.json");
        let service = RecordingService::new(hub.clone(), writers.clone(), &store_path, config);
        Fixture {
            hub,
            source,
            writers,
            store_path,
            service,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(config()).await
    }

    fn settings(camera: &str) -> RecordingSettings {
        RecordingSettings::new(camera, "bob", FrameFormat::with_size(640, 480))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture().await;
        let first = f.service.start(settings("/dev/video0")).await.unwrap();
        let second = f.service.start(settings("/dev/video0")).await.unwrap();
        assert_eq!(first, second);

        assert_eq!(f.service.tasks().await.len(), 1);
        let cam = f.source.camera("/dev/video0").unwrap();
        assert_eq!(cam.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.hub.cameras().await[0].consumers, 1);
    }

    #[tokio::test]
    async fn test_frames_reach_file_with_user_codec() {
        let f = fixture().await;
        f.service.start(settings("/dev/video0")).await.unwrap();
        let cam = f.source.camera("/dev/video0").unwrap();

        for i in 0..3u8 {
            cam.emit(640, 480, i);
            let writers = f.writers.clone();
            let want = i as usize + 1;
            eventually("frame written", move || {
                writers.files().first().map(|w| w.sequences.len()) == Some(want)
            })
            .await;
        }

        let files = f.writers.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].codec, "h265");
        assert!(files[0].path.starts_with("/rec/dev_video0"));
        assert_eq!(f.service.tasks().await[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_rotation_opens_new_files() {
        let f = fixture_with(RecordingConfig {
            rotate_interval: Duration::ZERO,
            ..config()
        })
        .await;
        let task_id = f.service.start(settings("/dev/video0")).await.unwrap();
        let cam = f.source.camera("/dev/video0").unwrap();

        for i in 0..3u8 {
            cam.emit(640, 480, i);
            let writers = f.writers.clone();
            let want = i as usize + 1;
            eventually("file opened", move || writers.files().len() == want).await;
        }

        f.service.stop(&task_id).await.unwrap();
        let files = f.writers.files();
        assert!(files.iter().all(|w| w.closed));
        assert!(files.iter().all(|w| w.sequences.len() == 1));
    }

    #[tokio::test]
    async fn test_stop_releases_camera_and_persists() {
        let f = fixture().await;
        let task_id = f.service.start(settings("/dev/video0")).await.unwrap();
        let store: TaskStore<RecordingSettings> = TaskStore::new(&f.store_path);
        assert_eq!(store.load().await.unwrap().len(), 1);

        f.service.stop(&task_id).await.unwrap();
        assert!(f.service.tasks().await.is_empty());
        assert!(!f.source.camera("/dev/video0").unwrap().is_running());
        assert!(store.load().await.unwrap().is_empty());

        let err = f.service.stop(&task_id).await.err().unwrap();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_start_rejects_unauthorized_and_unknown() {
        let f = fixture().await;
        let mut s = settings("/dev/video0");
        s.user = "eve".to_string();
        assert_eq!(f.service.start(s).await.err().unwrap().code(), "UNAUTHORIZED");
        assert_eq!(
            f.service.start(settings("/dev/video9")).await.err().unwrap().code(),
            "NOT_FOUND"
        );
        assert!(f.service.tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_rehooks_without_duplicates() {
        let f = fixture().await;
        let store: TaskStore<RecordingSettings> = TaskStore::new(&f.store_path);
        store
            .save(&[settings("/dev/video0"), settings("/dev/video2")])
            .await
            .unwrap();

        assert_eq!(f.service.restore().await, 2);
        assert_eq!(f.service.restore().await, 0);

        assert_eq!(f.service.tasks().await.len(), 2);
        assert!(f.source.camera("/dev/video0").unwrap().is_running());
        assert!(f.source.camera("/dev/video2").unwrap().is_running());

        // shutdown keeps the persisted set for the next start
        f.service.shutdown().await;
        assert!(f.service.tasks().await.is_empty());
        assert_eq!(store.load().await.unwrap().len(), 2);
        assert!(!f.source.camera("/dev/video0").unwrap().is_running());
    }

    #[tokio::test]
    async fn test_restore_skips_invalid_records() {
        let f = fixture().await;
        let store: TaskStore<RecordingSettings> = TaskStore::new(&f.store_path);
        store
            .save(&[
                RecordingSettings::new("", "bob", FrameFormat::unknown()),
                settings("/dev/video0"),
            ])
            .await
            .unwrap();

        assert_eq!(f.service.restore().await, 1);
    }

    #[tokio::test]
    async fn test_worker_rehooks_after_fault() {
        let f = fixture().await;
        f.service.start(settings("/dev/video0")).await.unwrap();
        let cam = f.source.camera("/dev/video0").unwrap();

        cam.fail("usb unplugged");
        assert!(!cam.is_running());

        let probe = cam.clone();
        eventually("camera restarted", move || probe.is_running()).await;
        assert_eq!(cam.start_calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.service.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_record_video_file_with_prebuffer() {
        let f = fixture().await;
        let cam = f.source.camera("/dev/video0").unwrap();
        let emitter = cam.clone();
        let feeder = tokio::spawn(async move {
            for i in 0..100u8 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                emitter.emit(640, 480, i);
            }
        });

        let prebuffer = vec![
            Frame::new(RgbImage::new(640, 480), 1001),
            Frame::new(RgbImage::new(640, 480), 1002),
        ];
        let request = ClipRequest {
            camera_id: "/dev/video0".to_string(),
            consumer_id: "clip".to_string(),
            format: FrameFormat::with_size(640, 480),
            duration: Duration::from_millis(150),
            prebuffer,
            path: PathBuf::from("/rec/clip.mp4"),
            codec: "h264".to_string(),
        };
        let path = f.service.record_video_file(&request).await.unwrap();
        feeder.abort();

        assert_eq!(path, PathBuf::from("/rec/clip.mp4"));
        let files = f.writers.files();
        assert_eq!(&files[0].sequences[..2], &[1001, 1002]);
        assert!(files[0].sequences.len() > 2);
        assert!(files[0].closed);
        assert!(!cam.is_running());
    }

    #[tokio::test]
    async fn test_writer_open_failure_keeps_task_alive() {
        let f = fixture().await;
        f.writers.set_fail_open(true);
        f.service.start(settings("/dev/video0")).await.unwrap();
        let cam = f.source.camera("/dev/video0").unwrap();
        cam.emit(640, 480, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.writers.files().is_empty());

        f.writers.set_fail_open(false);
        let writers = f.writers.clone();
        let emitter = cam.clone();
        eventually("file opened after retry", move || {
            emitter.emit(640, 480, 2);
            !writers.files().is_empty()
        })
        .await;
        assert_eq!(f.service.tasks().await.len(), 1);
    }
}
