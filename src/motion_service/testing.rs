//! Capturing notifier for tests

use super::notifier::Notifier;
use super::types::{NotificationKind, NotificationTarget};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub destination: String,
    pub kind: NotificationKind,
    pub caption: String,
    pub video: Option<PathBuf>,
}

#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl CapturingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().unwrap().iter().filter(|n| n.kind == kind).count()
    }

    fn record(&self, target: &NotificationTarget, kind: NotificationKind, caption: &str, video: Option<&Path>) {
        self.sent.lock().unwrap().push(SentNotification {
            destination: target.destination.clone(),
            kind,
            caption: caption.to_string(),
            video: video.map(Path::to_path_buf),
        });
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_text(&self, target: &NotificationTarget, text: &str) -> Result<()> {
        self.record(target, NotificationKind::Text, text, None);
        Ok(())
    }

    async fn send_image(&self, target: &NotificationTarget, caption: &str, _jpeg: &[u8]) -> Result<()> {
        self.record(target, NotificationKind::Image, caption, None);
        Ok(())
    }

    async fn send_video(&self, target: &NotificationTarget, caption: &str, path: &Path) -> Result<()> {
        self.record(target, NotificationKind::Video, caption, Some(path));
        Ok(())
    }
}
