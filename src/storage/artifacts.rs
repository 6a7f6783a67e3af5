//! Debug artifact sink
//!
//! Receives the most recent decoded frame (and, on the detection path, its
//! annotated copy) for out-of-band inspection. The core never reads these
//! back; concurrent uploads race on them last-write-wins and that is
//! accepted. Write failures are logged and swallowed.

use anyhow::Result;
use image::RgbImage;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Collaborator interface for "most recent frame" diagnostics
pub trait ArtifactSink: Send + Sync {
    fn store_frame(&self, frame: &RgbImage);
    fn store_annotated(&self, frame: &RgbImage);
}

/// Writes artifacts as PNG files under one directory.
///
/// The mutex serializes writes within this process; across processes the
/// files stay last-write-wins.
pub struct FileArtifactSink {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileArtifactSink {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn frame_path(&self) -> PathBuf {
        self.dir.join("last.png")
    }

    pub fn annotated_path(&self) -> PathBuf {
        self.dir.join("annotated.png")
    }

    fn save(&self, path: &Path, frame: &RgbImage) {
        let _guard = self.write_lock.lock();
        match frame.save(path) {
            Ok(()) => debug!("Stored debug artifact at {:?}", path),
            Err(e) => warn!("Failed to store debug artifact at {:?}: {}", path, e),
        }
    }
}

impl ArtifactSink for FileArtifactSink {
    fn store_frame(&self, frame: &RgbImage) {
        self.save(&self.frame_path(), frame);
    }

    fn store_annotated(&self, frame: &RgbImage) {
        self.save(&self.annotated_path(), frame);
    }
}
