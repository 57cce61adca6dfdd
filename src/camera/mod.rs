//! Camera - capture source abstraction
//!
//! ## Responsibilities
//!
//! - One object per physical/remote source, owned by the CameraHub
//! - Idle → Starting → Running → Stopping → Idle state machine
//! - Frame delivery through a [`FrameSink`] supplied at start
//! - Capture faults end the session (state back to Idle) and are reported
//!   through the sink, never propagated as errors to consumers
//!
//! Variants: USB (v4l2 via ffmpeg), IP/RTSP (ffmpeg), MJPEG over HTTP.
//! The hub and the task services only see `dyn Camera`.

mod capture;
mod ip;
mod mjpeg;
mod negotiate;
mod types;
mod usb;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{CaptureStream, FrameStreamSource, StreamCamera, CHUNK_SIZE};
pub use ip::{IpCamera, RtspSource};
pub use mjpeg::{HttpMjpegSource, MjpegCamera};
pub use negotiate::negotiate_format;
pub use types::*;
pub use usb::{UsbCamera, V4l2Source};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Frame/fault callbacks attached to a running camera
#[derive(Clone)]
pub struct FrameSink {
    on_frame: Arc<dyn Fn(Frame) + Send + Sync>,
    on_fault: Arc<dyn Fn(&str) + Send + Sync>,
}

impl FrameSink {
    pub fn new(
        on_frame: impl Fn(Frame) + Send + Sync + 'static,
        on_fault: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_frame: Arc::new(on_frame),
            on_fault: Arc::new(on_fault),
        }
    }

    /// Deliver a produced frame; must not block
    pub fn push(&self, frame: Frame) {
        (self.on_frame)(frame)
    }

    /// Report that the running session ended on its own
    pub fn fault(&self, reason: &str) {
        (self.on_fault)(reason)
    }
}

/// Capture source capability set
#[async_trait]
pub trait Camera: Send + Sync {
    /// Current description (name may have been changed)
    fn description(&self) -> CameraDescription;

    /// Change the display name
    fn rename(&self, name: &str);

    /// Open the stream and start delivering frames to `sink`
    ///
    /// A no-op returning success if already starting or running.
    async fn start(&self, format: &FrameFormat, sink: FrameSink) -> Result<()>;

    /// Close the stream; a no-op when idle
    async fn stop(&self) -> Result<()>;

    /// Capture a single frame outside of a running session
    async fn grab_one_frame(&self, format: &FrameFormat) -> Result<Frame>;

    fn state(&self) -> CameraState;

    fn is_running(&self) -> bool {
        self.state() == CameraState::Running
    }

    fn negotiate_format(&self, requested: &FrameFormat) -> FrameFormat {
        negotiate_format(requested, &self.description().supported_formats)
    }
}
