//! Test doubles for cameras

use super::{Camera, CameraDescription, CameraState, CameraType, Frame, FrameFormat, FrameSink};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Camera driven by the test: frames and faults are injected by hand
pub struct FakeCamera {
    description: Mutex<CameraDescription>,
    state: Mutex<CameraState>,
    sink: Mutex<Option<FrameSink>>,
    started_with: Mutex<Option<FrameFormat>>,
    fail_start: AtomicBool,
    fault_on_start: AtomicBool,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    sequence: AtomicU64,
}

impl FakeCamera {
    pub fn new(id: &str) -> Self {
        Self::with_description(
            CameraDescription::new(CameraType::Usb, id).with_formats(vec![
                FrameFormat::new(640, 480, "MJPG", 30.0),
                FrameFormat::new(1280, 720, "MJPG", 30.0),
            ]),
        )
    }

    pub fn with_description(description: CameraDescription) -> Self {
        Self {
            description: Mutex::new(description),
            state: Mutex::new(CameraState::Idle),
            sink: Mutex::new(None),
            started_with: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            fault_on_start: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Report a capture fault from inside `start`, before it returns
    pub fn set_fault_on_start(&self, fault: bool) {
        self.fault_on_start.store(fault, Ordering::SeqCst);
    }

    pub fn started_with(&self) -> Option<FrameFormat> {
        self.started_with.lock().unwrap().clone()
    }

    /// Push a solid-colour frame of the given size; false if not running
    pub fn emit(&self, width: u32, height: u32, value: u8) -> bool {
        self.emit_image(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
    }

    pub fn emit_image(&self, image: RgbImage) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        match sink {
            Some(sink) if *self.state.lock().unwrap() == CameraState::Running => {
                let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                sink.push(Frame::new(image, seq));
                true
            }
            _ => false,
        }
    }

    /// Simulate the capture dropping while running
    pub fn fail(&self, reason: &str) {
        let sink = self.sink.lock().unwrap().take();
        *self.state.lock().unwrap() = CameraState::Idle;
        if let Some(sink) = sink {
            sink.fault(reason);
        }
    }
}

#[async_trait]
impl Camera for FakeCamera {
    fn description(&self) -> CameraDescription {
        self.description.lock().unwrap().clone()
    }

    fn rename(&self, name: &str) {
        let mut description = self.description.lock().unwrap();
        description.name = name.to_string();
    }

    async fn start(&self, format: &FrameFormat, sink: FrameSink) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.description().id;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::capture(&id, "device unavailable"));
        }
        let mut state = self.state.lock().unwrap();
        if *state == CameraState::Running {
            return Ok(());
        }
        *self.started_with.lock().unwrap() = Some(format.clone());
        if self.fault_on_start.load(Ordering::SeqCst) {
            drop(state);
            sink.fault("stream closed immediately");
            return Ok(());
        }
        *state = CameraState::Running;
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = CameraState::Idle;
        self.sink.lock().unwrap().take();
        Ok(())
    }

    async fn grab_one_frame(&self, format: &FrameFormat) -> Result<Frame> {
        let (w, h) = if format.has_resolution() {
            (format.width, format.height)
        } else {
            (640, 480)
        };
        Ok(Frame::new(RgbImage::from_pixel(w, h, Rgb([9, 9, 9])), 0))
    }

    fn state(&self) -> CameraState {
        *self.state.lock().unwrap()
    }
}
