//! Shared capture driver
//!
//! Every camera variant produces an MJPEG byte stream (an ffmpeg pipe or an
//! HTTP body). `StreamCamera` owns the state machine and the capture task
//! that scans the stream, decodes pictures and pushes them to the sink.

use super::{Camera, CameraDescription, CameraState, Frame, FrameFormat, FrameSink};
use crate::codec::decode_jpeg;
use crate::error::{Error, Result};
use crate::mjpeg_parser::{MjpegParser, DEFAULT_MAX_FRAME_BYTES};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Fixed read size for capture pipes
pub const CHUNK_SIZE: usize = 16 * 1024;

/// How long `stop` waits for the capture task to wind down
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `grab_one_frame` waits for a decodable picture
const GRAB_TIMEOUT: Duration = Duration::from_secs(15);

/// An open MJPEG byte stream, plus the process producing it if any
pub struct CaptureStream {
    bytes: BoxStream<'static, std::io::Result<Bytes>>,
    // Dropped (and killed) together with the stream
    _child: Option<Child>,
}

impl CaptureStream {
    pub fn from_stream(bytes: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        Self {
            bytes,
            _child: None,
        }
    }

    /// Wrap a child process whose stdout carries the MJPEG stream
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("capture process has no stdout".to_string()))?;
        Ok(Self {
            bytes: ReaderStream::with_capacity(stdout, CHUNK_SIZE).boxed(),
            _child: Some(child),
        })
    }
}

/// Opens the byte stream for one camera variant
#[async_trait]
pub trait FrameStreamSource: Send + Sync + 'static {
    async fn open(
        &self,
        camera_id: &str,
        format: &FrameFormat,
        single_frame: bool,
    ) -> Result<CaptureStream>;
}

/// Spawn ffmpeg writing MJPEG pictures to stdout
pub(crate) fn spawn_ffmpeg(camera_id: &str, args: &[String]) -> Result<CaptureStream> {
    tracing::debug!(camera_id = %camera_id, args = ?args, "Spawning ffmpeg capture");

    let child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::capture(camera_id, format!("failed to spawn ffmpeg: {}", e)))?;

    CaptureStream::from_child(child)
}

/// Output half of an ffmpeg command line: MJPEG pictures on stdout
pub(crate) fn ffmpeg_output_args(format: &FrameFormat, scale: bool, single_frame: bool) -> Vec<String> {
    let mut args = Vec::new();
    if scale && format.has_resolution() {
        args.push("-vf".to_string());
        args.push(format!("scale={}:{}", format.width, format.height));
    }
    if format.fps > 0.0 && !single_frame {
        args.push("-r".to_string());
        args.push(format.fps.to_string());
    }
    if single_frame {
        args.push("-frames:v".to_string());
        args.push("1".to_string());
    }
    args.extend(
        ["-f", "image2pipe", "-c:v", "mjpeg", "-q:v", "5", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

struct Session {
    state: CameraState,
    generation: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Camera backed by an MJPEG byte stream
pub struct StreamCamera<S> {
    description: RwLock<CameraDescription>,
    source: S,
    session: Arc<Mutex<Session>>,
    max_frame_bytes: usize,
}

impl<S: FrameStreamSource> StreamCamera<S> {
    pub fn with_source(description: CameraDescription, source: S) -> Self {
        Self {
            description: RwLock::new(description),
            source,
            session: Arc::new(Mutex::new(Session {
                state: CameraState::Idle,
                generation: 0,
                cancel: None,
                task: None,
            })),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    fn id(&self) -> String {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone()
    }
}

#[async_trait]
impl<S: FrameStreamSource> Camera for StreamCamera<S> {
    fn description(&self) -> CameraDescription {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn rename(&self, name: &str) {
        let mut description = self
            .description
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        description.name = if name.is_empty() {
            description.id.clone()
        } else {
            name.to_string()
        };
    }

    async fn start(&self, format: &FrameFormat, sink: FrameSink) -> Result<()> {
        let camera_id = self.id();
        {
            let mut session = lock_session(&self.session);
            match session.state {
                CameraState::Running | CameraState::Starting => return Ok(()),
                CameraState::Stopping => {
                    return Err(Error::capture(&camera_id, "camera is stopping"));
                }
                CameraState::Idle => session.state = CameraState::Starting,
            }
        }

        let stream = match self.source.open(&camera_id, format, false).await {
            Ok(stream) => stream,
            Err(e) => {
                lock_session(&self.session).state = CameraState::Idle;
                tracing::warn!(camera_id = %camera_id, error = %e, "Camera failed to start");
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let generation = {
            let mut session = lock_session(&self.session);
            if session.state != CameraState::Starting {
                // stopped while opening
                session.state = CameraState::Idle;
                return Err(Error::capture(&camera_id, "stopped while starting"));
            }
            session.state = CameraState::Running;
            session.generation += 1;
            session.cancel = Some(cancel.clone());
            session.generation
        };

        let task = tokio::spawn(run_capture(
            camera_id.clone(),
            stream,
            sink,
            cancel,
            self.session.clone(),
            generation,
            self.max_frame_bytes,
        ));

        {
            let mut session = lock_session(&self.session);
            if session.generation == generation {
                session.task = Some(task);
            }
        }

        tracing::info!(camera_id = %camera_id, format = %format, "Camera started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let camera_id = self.id();
        let (cancel, task) = {
            let mut session = lock_session(&self.session);
            if session.state == CameraState::Idle {
                return Ok(());
            }
            session.state = CameraState::Stopping;
            (session.cancel.take(), session.task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if timeout(STOP_TIMEOUT, task).await.is_err() {
                tracing::warn!(camera_id = %camera_id, "Capture task did not stop in time");
            }
        }

        lock_session(&self.session).state = CameraState::Idle;
        tracing::info!(camera_id = %camera_id, "Camera stopped");
        Ok(())
    }

    async fn grab_one_frame(&self, format: &FrameFormat) -> Result<Frame> {
        let camera_id = self.id();
        let mut stream = self.source.open(&camera_id, format, true).await?;
        let parser = MjpegParser::new(self.max_frame_bytes);

        timeout(GRAB_TIMEOUT, first_frame(&camera_id, &mut stream, parser))
            .await
            .map_err(|_| Error::capture(&camera_id, "timed out waiting for a frame"))?
    }

    fn state(&self) -> CameraState {
        lock_session(&self.session).state
    }
}

async fn first_frame(
    camera_id: &str,
    stream: &mut CaptureStream,
    mut parser: MjpegParser,
) -> Result<Frame> {
    while let Some(chunk) = stream.bytes.next().await {
        let chunk = chunk?;
        for jpeg in parser.feed(&chunk).frames {
            match decode_jpeg(&jpeg) {
                Ok(image) => return Ok(Frame::new(image, 0)),
                Err(e) => {
                    tracing::debug!(camera_id = %camera_id, error = %e, "Discarding undecodable picture");
                }
            }
        }
    }
    Err(Error::capture(camera_id, "stream ended before a frame was decoded"))
}

async fn run_capture(
    camera_id: String,
    mut stream: CaptureStream,
    sink: FrameSink,
    cancel: CancellationToken,
    session: Arc<Mutex<Session>>,
    generation: u64,
    max_frame_bytes: usize,
) {
    let mut parser = MjpegParser::new(max_frame_bytes);
    let mut sequence: u64 = 0;

    let fault = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            chunk = stream.bytes.next() => match chunk {
                Some(Ok(bytes)) => {
                    let outcome = parser.feed(&bytes);
                    if outcome.overflows > 0 {
                        let err = Error::Protocol(format!("{} oversized picture(s) dropped", outcome.overflows));
                        tracing::warn!(camera_id = %camera_id, error = %err, "Malformed MJPEG stream");
                    }
                    for jpeg in outcome.frames {
                        match decode_jpeg(&jpeg) {
                            Ok(image) => {
                                sequence += 1;
                                sink.push(Frame::new(image, sequence));
                            }
                            Err(e) => {
                                tracing::debug!(camera_id = %camera_id, error = %e, "Discarding undecodable picture");
                            }
                        }
                    }
                }
                Some(Err(e)) => break Some(format!("read error: {}", e)),
                None => break Some("stream ended".to_string()),
            }
        }
    };

    drop(stream);

    if let Some(reason) = fault {
        let current = {
            let mut session = lock_session(&session);
            let current = session.generation == generation && session.state == CameraState::Running;
            if current {
                session.state = CameraState::Idle;
                session.cancel = None;
                session.task = None;
            }
            current
        };
        if current {
            tracing::warn!(camera_id = %camera_id, reason = %reason, frames = sequence, "Capture dropped");
            sink.fault(&reason);
        }
    } else {
        tracing::debug!(camera_id = %camera_id, frames = sequence, "Capture task cancelled");
    }
}
