//! Discovery - camera enumeration and construction
//!
//! ## Responsibilities
//!
//! - Local USB enumeration (V4L2 nodes)
//! - ONVIF WS-Discovery of IP cameras on every local interface
//! - Building a concrete [`Camera`] from a description
//!
//! Discovery never touches the hub registry; `CameraHub::refresh_collection`
//! reconciles the results.

mod onvif;
mod usb;
mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use onvif::{
    discover_onvif, parse_broadcast_addresses, parse_probe_matches, probe_message, rtsp_uri,
    WS_DISCOVERY_MULTICAST, WS_DISCOVERY_PORT,
};
pub use usb::{discover_usb, parse_v4l2_formats};
pub use xml::{extract_xml_value, extract_xml_values};

use crate::camera::{Camera, CameraDescription, CameraType, IpCamera, MjpegCamera, UsbCamera};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Where cameras come from
#[async_trait]
pub trait CameraSource: Send + Sync {
    /// Whatever answered within `timeout`
    async fn discover(&self, timeout: Duration) -> Vec<CameraDescription>;

    /// Build the capture object for a description
    fn open(&self, description: CameraDescription) -> Result<Arc<dyn Camera>>;
}

/// Description for an explicitly configured camera id (path or URI)
pub fn custom_description(id: &str) -> CameraDescription {
    CameraDescription::new(CameraType::from_id(id), id.trim())
}

/// USB + ONVIF discovery backed by the real capture backends
pub struct SystemCameraSource {
    onvif_rtsp_path: String,
}

impl SystemCameraSource {
    pub fn new(onvif_rtsp_path: impl Into<String>) -> Self {
        Self {
            onvif_rtsp_path: onvif_rtsp_path.into(),
        }
    }
}

impl Default for SystemCameraSource {
    fn default() -> Self {
        Self::new("onvif1")
    }
}

#[async_trait]
impl CameraSource for SystemCameraSource {
    async fn discover(&self, timeout: Duration) -> Vec<CameraDescription> {
        let (usb, onvif) = tokio::join!(
            discover_usb(),
            discover_onvif(timeout, &self.onvif_rtsp_path)
        );

        let mut cameras = usb;
        match onvif {
            Ok(found) => cameras.extend(found),
            Err(e) => tracing::warn!(error = %e, "ONVIF discovery failed"),
        }

        let mut seen = std::collections::HashSet::new();
        cameras.retain(|c| seen.insert(c.id.clone()));
        cameras
    }

    fn open(&self, description: CameraDescription) -> Result<Arc<dyn Camera>> {
        match description.camera_type {
            CameraType::Usb => Ok(Arc::new(UsbCamera::new(description))),
            CameraType::Ip => Ok(Arc::new(IpCamera::new(description))),
            CameraType::Mjpeg => Ok(Arc::new(MjpegCamera::new(description)?)),
            CameraType::Unknown => Err(Error::Config(format!(
                "Cannot infer camera type for '{}'",
                description.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_description_infers_type() {
        let desc = custom_description("rtsp://10.0.0.9:554/stream1");
        assert_eq!(desc.camera_type, CameraType::Ip);
        assert_eq!(desc.name, "rtsp://10.0.0.9:554/stream1");

        let desc = custom_description(" http://10.0.0.9/mjpg ");
        assert_eq!(desc.camera_type, CameraType::Mjpeg);
        assert_eq!(desc.id, "http://10.0.0.9/mjpg");
    }

    #[test]
    fn test_open_unknown_type_is_config_error() {
        let source = SystemCameraSource::default();
        let err = source
            .open(custom_description("smb://share/cam"))
            .err()
            .unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_open_by_type() {
        let source = SystemCameraSource::default();
        let cam = source.open(custom_description("/dev/video3")).unwrap();
        assert_eq!(cam.description().camera_type, CameraType::Usb);
        assert!(!cam.is_running());
    }
}
