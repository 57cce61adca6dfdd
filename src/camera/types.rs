//! Camera data types
//!
//! Frame formats, camera descriptions and the frame buffer shared by all
//! consumers.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Capture mode: resolution, pixel encoding and frame rate
///
/// `fps <= 0` means unconstrained/unknown; zero width/height means
/// "no resolution requested".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub pixel_format: String,
    #[serde(default)]
    pub fps: f32,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, pixel_format: impl Into<String>, fps: f32) -> Self {
        Self {
            width,
            height,
            pixel_format: pixel_format.into(),
            fps,
        }
    }

    /// Resolution-only format
    pub fn with_size(width: u32, height: u32) -> Self {
        Self::new(width, height, "", 0.0)
    }

    /// Zero/unknown format
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn has_resolution(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl FrameFormat {
    /// fps as compared and hashed: bitwise, with -0.0 folded into 0.0
    fn fps_key(&self) -> u32 {
        if self.fps == 0.0 {
            0
        } else {
            self.fps.to_bits()
        }
    }
}

// Equality and hashing share `fps_key` so the format can key a map.
impl PartialEq for FrameFormat {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixel_format == other.pixel_format
            && self.fps_key() == other.fps_key()
    }
}

impl Eq for FrameFormat {}

impl Hash for FrameFormat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.width.hash(state);
        self.height.hash(state);
        self.pixel_format.hash(state);
        self.fps_key().hash(state);
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        if !self.pixel_format.is_empty() {
            write!(f, " {}", self.pixel_format)?;
        }
        if self.fps > 0.0 {
            write!(f, " @{}fps", self.fps)?;
        }
        Ok(())
    }
}

/// Camera source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    Usb,
    Ip,
    Mjpeg,
    Unknown,
}

impl CameraType {
    /// Infer the source type from a configured id (device path or URI)
    pub fn from_id(id: &str) -> Self {
        let lower = id.to_lowercase();
        if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
            Self::Ip
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Mjpeg
        } else if lower.starts_with("/dev/") {
            Self::Usb
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Ip => "ip",
            Self::Mjpeg => "mjpeg",
            Self::Unknown => "unknown",
        }
    }
}

/// Discovered or configured camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescription {
    pub camera_type: CameraType,
    /// Unique, stable path or URI
    pub id: String,
    /// Display name, defaults to the id
    pub name: String,
    pub supported_formats: Vec<FrameFormat>,
}

impl CameraDescription {
    pub fn new(camera_type: CameraType, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            camera_type,
            name: id.clone(),
            id,
            supported_formats: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    pub fn with_formats(mut self, formats: Vec<FrameFormat>) -> Self {
        self.supported_formats = formats;
        self
    }
}

/// Capture state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Decoded frame
///
/// The pixel buffer is immutable once produced, so fan-out clones are
/// reference-counted copies.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Same frame with a different pixel buffer (resampled copy)
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }
}
