//! In-memory video writer for tests

use super::writer::{VideoWriter, VideoWriterFactory};
use crate::camera::{Frame, FrameFormat};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// What a memory writer received
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub codec: String,
    pub sequences: Vec<u64>,
    pub closed: bool,
}

/// Records every opened file instead of encoding
#[derive(Default)]
pub struct MemoryWriterFactory {
    files: Arc<Mutex<Vec<WrittenFile>>>,
    fail_open: AtomicBool,
}

impl MemoryWriterFactory {
    pub fn files(&self) -> Vec<WrittenFile> {
        self.files.lock().unwrap().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoWriterFactory for MemoryWriterFactory {
    async fn open(&self, path: &Path, _format: &FrameFormat, codec: &str) -> Result<Box<dyn VideoWriter>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Internal("disk full".to_string()));
        }
        let mut files = self.files.lock().unwrap();
        files.push(WrittenFile {
            path: path.to_path_buf(),
            codec: codec.to_string(),
            sequences: Vec::new(),
            closed: false,
        });
        Ok(Box::new(MemoryWriter {
            index: files.len() - 1,
            path: path.to_path_buf(),
            files: self.files.clone(),
        }))
    }
}

struct MemoryWriter {
    index: usize,
    path: PathBuf,
    files: Arc<Mutex<Vec<WrittenFile>>>,
}

#[async_trait]
impl VideoWriter for MemoryWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        self.files.lock().unwrap()[self.index]
            .sequences
            .push(frame.sequence);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<PathBuf> {
        self.files.lock().unwrap()[self.index].closed = true;
        Ok(self.path.clone())
    }
}
