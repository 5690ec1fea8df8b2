//! Shared fixtures for daemon integration tests

#![allow(dead_code)]

use image::{GrayImage, Luma};
use snapdiff_common::{Database, Lineage, NewSnapshot, Snapshot, SnapshotStore};
use snapdiff_daemon::{DaemonConfig, Engine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const WIDTH: u32 = 40;
pub const HEIGHT: u32 = 30;

pub struct Fixture {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub engine: Engine,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut DaemonConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = DaemonConfig::default();
        config.store_path = dir.path().to_path_buf();
        config.worker.poll_interval_ms = 10;
        configure(&mut config);

        let db = Arc::new(Database::open_memory().unwrap());
        let engine = Engine::new(config, db.clone());
        Self { dir, db, engine }
    }

    /// Write a flat gray PNG with the given pixels blackened
    pub fn image(&self, name: &str, changed: &[(u32, u32)]) -> PathBuf {
        write_png(self.dir.path(), name, changed)
    }

    pub fn reference(&self, lineage: &Lineage, image: Option<PathBuf>) -> Snapshot {
        let mut snapshot = NewSnapshot::new(lineage.clone()).computed(true);
        if let Some(image) = image {
            snapshot = snapshot.with_image(image, WIDTH, HEIGHT);
        }
        self.db.insert(&snapshot).unwrap()
    }

    pub fn candidate(&self, lineage: &Lineage, reference_id: i64, image: Option<PathBuf>) -> Snapshot {
        let mut snapshot = NewSnapshot::new(lineage.clone()).with_reference(Some(reference_id));
        if let Some(image) = image {
            snapshot = snapshot.with_image(image, WIDTH, HEIGHT);
        }
        self.db.insert(&snapshot).unwrap()
    }

    pub fn get(&self, id: i64) -> Snapshot {
        self.db.require(id).unwrap()
    }
}

pub fn lineage(name: &str) -> Lineage {
    Lineage {
        test_case_name: "login".to_string(),
        step_id: 3,
        environment_id: 1,
        version_id: 1,
        browser: "firefox".to_string(),
        display_name: name.to_string(),
    }
}

pub fn write_png(dir: &Path, name: &str, changed: &[(u32, u32)]) -> PathBuf {
    let mut image = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([180]));
    for &(x, y) in changed {
        image.put_pixel(x, y, Luma([20]));
    }
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}
