//! MJPEG-over-HTTP camera variant

use super::capture::{CaptureStream, FrameStreamSource, StreamCamera};
use super::{CameraDescription, FrameFormat};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// Connect timeout for MJPEG endpoints
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `multipart/x-mixed-replace` body read with reqwest
pub struct HttpMjpegSource {
    client: reqwest::Client,
}

impl HttpMjpegSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FrameStreamSource for HttpMjpegSource {
    async fn open(
        &self,
        camera_id: &str,
        _format: &FrameFormat,
        _single_frame: bool,
    ) -> Result<CaptureStream> {
        let response = self
            .client
            .get(camera_id)
            .send()
            .await
            .map_err(|e| Error::capture(camera_id, format!("connect failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::capture(camera_id, format!("HTTP status {}", status)));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(CaptureStream::from_stream(bytes))
    }
}

/// MJPEG HTTP camera; the description id is the stream URL
pub type MjpegCamera = StreamCamera<HttpMjpegSource>;

impl MjpegCamera {
    pub fn new(description: CameraDescription) -> Result<Self> {
        Ok(Self::with_source(description, HttpMjpegSource::new()?))
    }
}
