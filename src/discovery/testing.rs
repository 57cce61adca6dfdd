//! Scripted discovery for hub tests

use super::CameraSource;
use crate::camera::testing::FakeCamera;
use crate::camera::{Camera, CameraDescription};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns a scripted discovery result and hands out [`FakeCamera`]s
#[derive(Default)]
pub struct FakeSource {
    discovered: Mutex<Vec<CameraDescription>>,
    opened: Mutex<HashMap<String, Arc<FakeCamera>>>,
}

impl FakeSource {
    pub fn new(discovered: Vec<CameraDescription>) -> Self {
        Self {
            discovered: Mutex::new(discovered),
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_discovered(&self, discovered: Vec<CameraDescription>) {
        *self.discovered.lock().unwrap() = discovered;
    }

    /// Most recent camera object built for `id`
    pub fn camera(&self, id: &str) -> Option<Arc<FakeCamera>> {
        self.opened.lock().unwrap().get(id).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl CameraSource for FakeSource {
    async fn discover(&self, _timeout: Duration) -> Vec<CameraDescription> {
        self.discovered.lock().unwrap().clone()
    }

    fn open(&self, description: CameraDescription) -> Result<Arc<dyn Camera>> {
        let id = description.id.clone();
        let camera = Arc::new(FakeCamera::with_description(description));
        self.opened.lock().unwrap().insert(id, camera.clone());
        Ok(camera)
    }
}
