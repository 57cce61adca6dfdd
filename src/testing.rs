//! Shared test fixtures

use crate::camera::{CameraDescription, CameraType, FrameFormat};
use crate::camera_hub::{CameraHub, HubConfig};
use crate::discovery::testing::FakeSource;
use crate::user_directory::{StaticUserDirectory, UserInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub fn usb_description(id: &str) -> CameraDescription {
    CameraDescription::new(CameraType::Usb, id).with_formats(vec![
        FrameFormat::new(640, 480, "MJPG", 30.0),
        FrameFormat::new(1280, 720, "MJPG", 30.0),
    ])
}

/// alice: admin, bob: user (codec h265), eve: guest
pub fn test_users() -> StaticUserDirectory {
    let mut bob = UserInfo::new("bob", ["user"]);
    bob.default_codec = "h265".to_string();
    StaticUserDirectory::new([
        UserInfo::new("alice", ["admin"]),
        bob,
        UserInfo::new("eve", ["guest"]),
    ])
}

/// Hub over fake cameras, already refreshed
pub async fn test_hub(camera_ids: &[&str]) -> (Arc<CameraHub>, Arc<FakeSource>) {
    let source = Arc::new(FakeSource::new(
        camera_ids.iter().map(|id| usb_description(id)).collect(),
    ));
    let hub = Arc::new(CameraHub::new(
        HubConfig::default(),
        source.clone(),
        Arc::new(test_users()),
    ));
    hub.refresh_collection().await;
    (hub, source)
}

/// Fresh directory under the system temp dir
pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("camhub-{}-{}", prefix, uuid::Uuid::new_v4()))
}

/// Poll `cond` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
