//! Video file writers
//!
//! `FfmpegWriterFactory` pipes JPEG frames into an ffmpeg process that
//! encodes the container file.

use crate::camera::{Frame, FrameFormat};
use crate::codec;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

/// Time allowed for ffmpeg to flush and exit after its input closes
const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// ffmpeg stderr lines kept for the failure message
const STDERR_TAIL_LINES: usize = 20;

/// Read `reader` to the end, keeping only its last `max_lines` lines
async fn stderr_tail<R>(reader: R, max_lines: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() >= max_lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// An open video file
#[async_trait]
pub trait VideoWriter: Send {
    fn path(&self) -> &Path;

    async fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Finish the file and return its path
    async fn close(self: Box<Self>) -> Result<PathBuf>;
}

/// Opens video files
#[async_trait]
pub trait VideoWriterFactory: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &str {
        "mp4"
    }

    async fn open(&self, path: &Path, format: &FrameFormat, codec: &str) -> Result<Box<dyn VideoWriter>>;
}

/// `<dir>/<camera>/<UTC timestamp>.<ext>`
pub fn recording_path(dir: &Path, camera_id: &str, at: DateTime<Utc>, extension: &str) -> PathBuf {
    dir.join(sanitize_camera_id(camera_id))
        .join(format!("{}.{}", at.format("%Y%m%d_%H%M%S%.3f"), extension))
}

/// Filesystem-safe directory name for a camera id
pub fn sanitize_camera_id(camera_id: &str) -> String {
    let cleaned: String = camera_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    cleaned.trim_matches('_').to_string()
}

/// ffmpeg encoder name for a user codec preference
pub fn encoder_for(codec: &str) -> &'static str {
    match codec.to_ascii_lowercase().as_str() {
        "h265" | "hevc" | "x265" => "libx265",
        "mjpeg" | "mjpg" => "mjpeg",
        "vp9" => "libvpx-vp9",
        _ => "libx264",
    }
}

/// ffmpeg arguments reading JPEGs from stdin
pub fn ffmpeg_writer_args(path: &Path, fps: f32, codec: &str) -> Vec<String> {
    let encoder = encoder_for(codec);
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "image2pipe",
        "-c:v",
        "mjpeg",
        "-framerate",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}", fps));
    args.extend(["-i", "-", "-c:v", encoder].iter().map(|s| s.to_string()));
    if encoder != "mjpeg" {
        args.extend(["-pix_fmt", "yuv420p"].iter().map(|s| s.to_string()));
    }
    args.push(path.to_string_lossy().to_string());
    args
}

/// Writer factory backed by ffmpeg
pub struct FfmpegWriterFactory {
    default_fps: f32,
    quality: u8,
}

impl FfmpegWriterFactory {
    pub fn new(default_fps: f32) -> Self {
        Self {
            default_fps,
            quality: codec::DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self::new(15.0)
    }
}

#[async_trait]
impl VideoWriterFactory for FfmpegWriterFactory {
    async fn open(&self, path: &Path, format: &FrameFormat, codec: &str) -> Result<Box<dyn VideoWriter>> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let fps = if format.fps > 0.0 { format.fps } else { self.default_fps };
        let mut child = Command::new("ffmpeg")
            .args(ffmpeg_writer_args(path, fps, codec))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg spawn failed: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdin unavailable".to_string()))?;
        // drained in the background while frames are written
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(stderr_tail(stderr, STDERR_TAIL_LINES)));

        tracing::debug!(path = %path.display(), fps = fps, codec = %codec, "Video file opened");

        Ok(Box::new(FfmpegWriter {
            path: path.to_path_buf(),
            child,
            stdin: Some(stdin),
            stderr,
            size: None,
            quality: self.quality,
            frames: 0,
        }))
    }
}

struct FfmpegWriter {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    /// Size of the first frame; later frames are scaled to match
    size: Option<(u32, u32)>,
    quality: u8,
    frames: u64,
}

#[async_trait]
impl VideoWriter for FfmpegWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let (w, h) = *self.size.get_or_insert((frame.width(), frame.height()));
        let jpeg = if (frame.width(), frame.height()) == (w, h) {
            codec::encode_jpeg(frame, self.quality)?
        } else {
            codec::encode_jpeg(&frame.with_image(codec::resize(&frame.image, w, h)), self.quality)?
        };

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Internal("video writer already closed".to_string()))?;
        stdin.write_all(&jpeg).await?;
        self.frames += 1;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<PathBuf> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        let path = self.path.clone();
        let frames = self.frames;
        let status = match tokio::time::timeout(FINISH_TIMEOUT, self.child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Internal(format!(
                    "ffmpeg did not finish {} in time",
                    path.display()
                )));
            }
        };

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(Error::Internal(format!("ffmpeg failed: {}", stderr.trim())));
        }

        tracing::debug!(path = %path.display(), frames = frames, "Video file closed");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recording_path() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = recording_path(Path::new("/rec"), "rtsp://10.0.0.5:554/live", at, "mp4");
        assert_eq!(
            path,
            PathBuf::from("/rec/rtsp___10.0.0.5_554_live/20240309_140507.000.mp4")
        );
    }

    #[tokio::test]
    async fn test_stderr_tail_reads_everything_keeps_last_lines() {
        let log: String = (0..50_000).map(|i| format!("frame {} encoded\n", i)).collect();
        let tail = stderr_tail(log.as_bytes(), 3).await;
        assert_eq!(tail, "frame 49997 encoded\nframe 49998 encoded\nframe 49999 encoded");
        assert_eq!(stderr_tail(&b""[..], 3).await, "");
    }

    #[test]
    fn test_encoder_for() {
        assert_eq!(encoder_for("h264"), "libx264");
        assert_eq!(encoder_for("HEVC"), "libx265");
        assert_eq!(encoder_for("unknown"), "libx264");
    }

    #[test]
    fn test_ffmpeg_writer_args() {
        let args = ffmpeg_writer_args(Path::new("/tmp/a.mp4"), 25.0, "h264");
        let joined = args.join(" ");
        assert!(joined.contains("-f image2pipe -c:v mjpeg -framerate 25 -i -"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/a.mp4"));
    }
}
