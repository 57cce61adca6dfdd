//! IP/RTSP camera variant

use super::capture::{ffmpeg_output_args, spawn_ffmpeg, CaptureStream, FrameStreamSource, StreamCamera};
use super::{CameraDescription, FrameFormat};
use crate::error::Result;
use async_trait::async_trait;

/// RTSP stream read through ffmpeg (TCP transport)
pub struct RtspSource;

/// Input half of the ffmpeg command line for an RTSP URI
pub(crate) fn rtsp_input_args(uri: &str) -> Vec<String> {
    ["-rtsp_transport", "tcp", "-i", uri]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[async_trait]
impl FrameStreamSource for RtspSource {
    async fn open(
        &self,
        camera_id: &str,
        format: &FrameFormat,
        single_frame: bool,
    ) -> Result<CaptureStream> {
        let mut args = rtsp_input_args(camera_id);
        args.extend(ffmpeg_output_args(format, true, single_frame));
        spawn_ffmpeg(camera_id, &args)
    }
}

/// Network camera; the description id is the RTSP URI
pub type IpCamera = StreamCamera<RtspSource>;

impl IpCamera {
    pub fn new(description: CameraDescription) -> Self {
        Self::with_source(description, RtspSource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtsp_input_args() {
        let args = rtsp_input_args("rtsp://192.168.1.20:554/onvif1");
        assert_eq!(args, vec!["-rtsp_transport", "tcp", "-i", "rtsp://192.168.1.20:554/onvif1"]);
    }
}
