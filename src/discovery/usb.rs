//! USB (V4L2) enumeration

use crate::camera::{CameraDescription, CameraType, FrameFormat};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const DEV_DIR: &str = "/dev";
const SYSFS_V4L_DIR: &str = "/sys/class/video4linux";

/// Parse `v4l2-ctl --list-formats-ext` output
///
/// One entry per (pixel format, size, interval). A size without any
/// listed interval yields a single entry with unknown fps.
pub fn parse_v4l2_formats(output: &str) -> Vec<FrameFormat> {
    let mut formats = Vec::new();
    let mut pixel_format = String::new();
    let mut size: Option<(u32, u32)> = None;
    let mut size_has_interval = false;

    for line in output.lines() {
        let line = line.trim();

        if line.starts_with('[') {
            // [0]: 'MJPG' (Motion-JPEG, compressed)
            flush_size(&mut formats, &pixel_format, size.take(), size_has_interval);
            if let Some(fourcc) = line.split('\'').nth(1) {
                pixel_format = fourcc.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("Size:") {
            // Size: Discrete 1280x720
            flush_size(&mut formats, &pixel_format, size.take(), size_has_interval);
            size_has_interval = false;
            size = rest
                .split_whitespace()
                .last()
                .and_then(|dims| dims.split_once('x'))
                .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)));
        } else if let Some(rest) = line.strip_prefix("Interval:") {
            // Interval: Discrete 0.033s (30.000 fps)
            if let Some((w, h)) = size {
                let fps = rest
                    .split('(')
                    .nth(1)
                    .and_then(|s| s.split_whitespace().next())
                    .and_then(|s| s.parse::<f32>().ok())
                    .unwrap_or(0.0);
                formats.push(FrameFormat::new(w, h, pixel_format.as_str(), fps));
                size_has_interval = true;
            }
        }
    }
    flush_size(&mut formats, &pixel_format, size, size_has_interval);

    formats
}

fn flush_size(
    formats: &mut Vec<FrameFormat>,
    pixel_format: &str,
    size: Option<(u32, u32)>,
    has_interval: bool,
) {
    if let (Some((w, h)), false) = (size, has_interval) {
        formats.push(FrameFormat::new(w, h, pixel_format, 0.0));
    }
}

async fn device_name(node: &str) -> Option<String> {
    let path = Path::new(SYSFS_V4L_DIR).join(node).join("name");
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn device_formats(device: &str) -> Vec<FrameFormat> {
    let output = Command::new("v4l2-ctl")
        .args(["--device", device, "--list-formats-ext"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(o) if o.status.success() => parse_v4l2_formats(&String::from_utf8_lossy(&o.stdout)),
        Ok(o) => {
            tracing::debug!(device = %device, status = ?o.status.code(), "v4l2-ctl failed");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(device = %device, error = %e, "v4l2-ctl unavailable");
            Vec::new()
        }
    }
}

/// Enumerate `/dev/video*` capture nodes
///
/// Metadata-only nodes (no capture formats listed) are skipped when
/// `v4l2-ctl` is available.
pub async fn discover_usb() -> Vec<CameraDescription> {
    let mut nodes = Vec::new();
    let mut entries = match tokio::fs::read_dir(DEV_DIR).await {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read /dev");
            return Vec::new();
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_video_node = name
            .strip_prefix("video")
            .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if is_video_node {
            nodes.push(name);
        }
    }
    nodes.sort();

    let probed = which_v4l2_ctl().await;
    let mut cameras = Vec::new();
    for node in nodes {
        let device = format!("{}/{}", DEV_DIR, node);
        let formats = device_formats(&device).await;
        if probed && formats.is_empty() {
            tracing::trace!(device = %device, "Skipping node without capture formats");
            continue;
        }

        let name = device_name(&node).await.unwrap_or_default();
        cameras.push(
            CameraDescription::new(CameraType::Usb, device)
                .with_name(name)
                .with_formats(formats),
        );
    }

    tracing::debug!(count = cameras.len(), "USB enumeration finished");
    cameras
}

async fn which_v4l2_ctl() -> bool {
    Command::new("v4l2-ctl")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ioctl: VIDIOC_ENUM_FMT
\tType: Video Capture

\t[0]: 'MJPG' (Motion-JPEG, compressed)
\t\tSize: Discrete 1280x720
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t\t\tInterval: Discrete 0.067s (15.000 fps)
\t\tSize: Discrete 640x480
\t\t\tInterval: Discrete 0.033s (30.000 fps)
\t[1]: 'YUYV' (YUYV 4:2:2)
\t\tSize: Discrete 320x240
";

    #[test]
    fn test_parse_v4l2_formats() {
        let formats = parse_v4l2_formats(SAMPLE);
        assert_eq!(
            formats,
            vec![
                FrameFormat::new(1280, 720, "MJPG", 30.0),
                FrameFormat::new(1280, 720, "MJPG", 15.0),
                FrameFormat::new(640, 480, "MJPG", 30.0),
                FrameFormat::new(320, 240, "YUYV", 0.0),
            ]
        );
    }

    #[test]
    fn test_parse_v4l2_formats_empty() {
        assert!(parse_v4l2_formats("").is_empty());
    }
}
