//! camhub library
//!
//! ## Architecture
//!
//! 1. Camera - capture backends (USB, RTSP, MJPEG over HTTP) behind one trait
//! 2. MjpegParser - byte stream to JPEG frames
//! 3. Discovery - USB enumeration and ONVIF WS-Discovery
//! 4. CameraHub - registry, lazy start/stop, newest-wins fan-out to consumers
//! 5. MotionService - frame differencing with throttled notifications
//! 6. RecordingService - continuous recording with file rotation
//! 7. TaskStore - persisted task lists replayed on restart
//!
//! ## Design Principles
//!
//! - A camera runs only while at least one consumer is hooked
//! - Slow consumers lose their oldest frames, never block capture
//! - Tasks survive restarts and camera faults

pub mod camera;
pub mod camera_hub;
pub mod codec;
pub mod discovery;
pub mod error;
pub mod mjpeg_parser;
pub mod motion_service;
pub mod recording_service;
pub mod state;
pub mod task_store;
pub mod user_directory;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use state::AppState;
