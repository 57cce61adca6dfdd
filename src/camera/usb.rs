//! USB (v4l2) camera variant

use super::capture::{ffmpeg_output_args, spawn_ffmpeg, CaptureStream, FrameStreamSource, StreamCamera};
use super::{CameraDescription, FrameFormat};
use crate::error::Result;
use async_trait::async_trait;

/// v4l2 device read through ffmpeg
pub struct V4l2Source;

/// ffmpeg `-input_format` for a v4l2 fourcc
fn input_format(pixel_format: &str) -> Option<&'static str> {
    match pixel_format.to_uppercase().as_str() {
        "MJPG" | "MJPEG" => Some("mjpeg"),
        "YUYV" | "YUY2" => Some("yuyv422"),
        "H264" => Some("h264"),
        "NV12" => Some("nv12"),
        _ => None,
    }
}

/// Input half of the ffmpeg command line for a v4l2 device
pub(crate) fn v4l2_input_args(device: &str, format: &FrameFormat) -> Vec<String> {
    let mut args = vec!["-f".to_string(), "v4l2".to_string()];
    if let Some(input) = input_format(&format.pixel_format) {
        args.push("-input_format".to_string());
        args.push(input.to_string());
    }
    if format.has_resolution() {
        args.push("-video_size".to_string());
        args.push(format!("{}x{}", format.width, format.height));
    }
    if format.fps > 0.0 {
        args.push("-framerate".to_string());
        args.push(format.fps.to_string());
    }
    args.push("-i".to_string());
    args.push(device.to_string());
    args
}

#[async_trait]
impl FrameStreamSource for V4l2Source {
    async fn open(
        &self,
        camera_id: &str,
        format: &FrameFormat,
        single_frame: bool,
    ) -> Result<CaptureStream> {
        let mut args = v4l2_input_args(camera_id, format);
        // the device already delivers the negotiated size
        args.extend(ffmpeg_output_args(format, false, single_frame));
        spawn_ffmpeg(camera_id, &args)
    }
}

/// Local USB camera; the description id is the device path
pub type UsbCamera = StreamCamera<V4l2Source>;

impl UsbCamera {
    pub fn new(description: CameraDescription) -> Self {
        Self::with_source(description, V4l2Source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4l2_input_args() {
        let args = v4l2_input_args("/dev/video0", &FrameFormat::new(1280, 720, "MJPG", 30.0));
        assert_eq!(
            args,
            vec![
                "-f", "v4l2", "-input_format", "mjpeg", "-video_size", "1280x720",
                "-framerate", "30", "-i", "/dev/video0"
            ]
        );
    }

    #[test]
    fn test_unknown_format_lets_device_choose() {
        let args = v4l2_input_args("/dev/video2", &FrameFormat::unknown());
        assert_eq!(args, vec!["-f", "v4l2", "-i", "/dev/video2"]);
    }
}
