//! Test harness for isolated pipeline runs.
//!
//! `TestHarness` owns a temp directory holding a file-backed database, an
//! uploads directory and the result cache, plus a `Config` pointing at them.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use watermill::db::asset_repo::{self, NewAsset};
use watermill::{
    Asset, Config, Database, ProcessedAsset, QueueBackend, Service, SqliteBackend,
    WatermarkRegistry,
};

/// Upper bound for any wait on background work.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TestHarness {
    temp_dir: TempDir,
    pub uploads_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub config: Config,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness whose config can be adjusted before the database is opened.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let uploads_dir = base.join("uploads");
        let cache_dir = base.join("cache");
        std::fs::create_dir_all(&uploads_dir).expect("Failed to create uploads dir");

        let mut config = Config {
            database_path: base.join("data").join("watermill.db"),
            cache_directory: cache_dir.clone(),
            worker_count: 2,
            ..Config::default()
        };
        config.queue.poll_interval_ms = 10;
        adjust(&mut config);

        let db = Database::open(&config.database_path).expect("Failed to open database");

        Self {
            temp_dir,
            uploads_dir,
            cache_dir,
            config,
            db,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes an upload and registers it as an asset.
    pub fn upload(&self, filename: &str, content: &[u8]) -> Asset {
        let path = self.uploads_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write upload");
        self.register(filename, &path)
    }

    /// Writes a one-page PDF upload.
    pub fn upload_pdf(&self, filename: &str) -> Asset {
        let path = self.uploads_dir.join(filename);
        super::write_sample_pdf(&path, "Original page");
        self.register(filename, &path)
    }

    fn register(&self, filename: &str, path: &Path) -> Asset {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) as i64;
        asset_repo::insert(&self.db, &NewAsset::new(filename, path, size))
            .expect("Failed to insert asset")
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        Arc::new(SqliteBackend::new(
            self.db.clone(),
            self.config.queue.poll_interval(),
        ))
    }

    /// Starts the full pipeline on the harness database.
    pub fn start(&self, registry: WatermarkRegistry) -> Service {
        Service::start_with(&self.config, self.db.clone(), self.backend(), registry)
            .expect("Failed to start service")
    }

    /// Polls until the pair's row reaches a terminal status.
    pub fn wait_for_terminal(&self, service: &Service, asset_id: i64, user_id: &str) -> ProcessedAsset {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            if let Some(row) = service
                .orchestrator()
                .status(asset_id, user_id)
                .expect("Failed to read status")
            {
                if row.status.is_terminal() {
                    return row;
                }
            }
            assert!(
                Instant::now() < deadline,
                "asset {} for {} never reached a terminal status",
                asset_id,
                user_id
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
