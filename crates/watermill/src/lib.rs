pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod sanitize;
pub mod service;
pub mod telemetry;
pub mod watermark;
pub mod worker;

pub use cache::{CacheReaper, ReapReport, ReaperHandle, ResultCache};
pub use config::{load_config, Config, LogFormat};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, Result, StorageError, WatermillError, WorkerError};
pub use model::{Asset, AssetStatus, MediaKind, ProcessedAsset, ProcessingStatus, UserIdentity};
pub use orchestrator::{Orchestrator, OrchestratorError, RequestOutcome};
pub use queue::{Job, JobQueue, MemoryBackend, QueueBackend, QueueError, SqliteBackend};
pub use service::Service;
pub use telemetry::init_logging;
pub use watermark::{
    PdfWatermarker, TransformVariant, VideoPreset, VideoWatermarker, WatermarkError,
    WatermarkRegistry, Watermarker,
};
pub use worker::{JobOutcome, WorkerContext, WorkerPool};
