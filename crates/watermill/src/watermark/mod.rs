pub mod pdf;
pub mod video;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::WatermarkConfig;
use crate::model::MediaKind;

pub use pdf::PdfWatermarker;
pub use video::{VideoPreset, VideoWatermarker};

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Failed to read source '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to watermark PDF: {0}")]
    Pdf(String),

    #[error("Failed to run '{program}': {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Transform reported success but no output was written to '{0}'")]
    MissingOutput(PathBuf),

    #[error("Failed to move result into '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Embeds an identifying label into a file.
///
/// Implementations hold no shared mutable state, so one instance can serve
/// every worker thread concurrently.
pub trait Watermarker: Send + Sync {
    fn apply(&self, input: &Path, output: &Path, label: &str) -> Result<(), WatermarkError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Which transform handled a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformVariant {
    Document,
    Video,
    LargeVideo,
}

/// Routes a source file to the transform for its media kind.
pub struct WatermarkRegistry {
    document: Box<dyn Watermarker>,
    video: Box<dyn Watermarker>,
    large_video: Box<dyn Watermarker>,
    large_video_threshold: u64,
}

impl WatermarkRegistry {
    /// Production registry: lopdf for documents, ffmpeg for video.
    pub fn new(config: &WatermarkConfig) -> Self {
        Self::with_transforms(
            Box::new(PdfWatermarker::new()),
            Box::new(VideoWatermarker::new(&config.ffmpeg_path, VideoPreset::Standard)),
            Box::new(VideoWatermarker::new(&config.ffmpeg_path, VideoPreset::Large)),
            config.large_video_threshold_bytes,
        )
    }

    pub fn with_transforms(
        document: Box<dyn Watermarker>,
        video: Box<dyn Watermarker>,
        large_video: Box<dyn Watermarker>,
        large_video_threshold: u64,
    ) -> Self {
        Self {
            document,
            video,
            large_video,
            large_video_threshold,
        }
    }

    /// Picks the variant for a source of `source_size` bytes. Video above
    /// the threshold goes to the large-file variant.
    pub fn select(&self, kind: MediaKind, source_size: u64) -> TransformVariant {
        match kind {
            MediaKind::Document => TransformVariant::Document,
            MediaKind::Video if source_size > self.large_video_threshold => {
                TransformVariant::LargeVideo
            }
            MediaKind::Video => TransformVariant::Video,
        }
    }

    fn transform(&self, variant: TransformVariant) -> &dyn Watermarker {
        match variant {
            TransformVariant::Document => self.document.as_ref(),
            TransformVariant::Video => self.video.as_ref(),
            TransformVariant::LargeVideo => self.large_video.as_ref(),
        }
    }

    /// Watermarks `input` into `output`.
    ///
    /// The transform writes to a staging file next to `output`, which is
    /// renamed into place only once it exists. On any failure the staging
    /// file and any earlier result at `output` are removed, so `output`
    /// exists afterwards iff this call succeeded.
    pub fn apply(
        &self,
        kind: MediaKind,
        input: &Path,
        output: &Path,
        label: &str,
    ) -> Result<TransformVariant, WatermarkError> {
        let size = std::fs::metadata(input)
            .map_err(|e| WatermarkError::ReadSource {
                path: input.to_path_buf(),
                source: e,
            })?
            .len();

        let variant = self.select(kind, size);
        let transform = self.transform(variant);
        let staging = staging_path(output);
        log::debug!(
            "Applying {} watermark to {} ({} bytes)",
            transform.name(),
            crate::sanitize::redact_path(input),
            size
        );

        let result = transform
            .apply(input, &staging, label)
            .and_then(|()| {
                if staging.is_file() {
                    Ok(())
                } else {
                    Err(WatermarkError::MissingOutput(output.to_path_buf()))
                }
            })
            .and_then(|()| {
                std::fs::rename(&staging, output).map_err(|e| WatermarkError::Persist {
                    path: output.to_path_buf(),
                    source: e,
                })
            });

        if result.is_err() {
            discard(&staging);
            discard(output);
        }
        result.map(|()| variant)
    }
}

/// Hidden sibling of `output` that keeps its extension, since ffmpeg picks
/// the container from it.
fn staging_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(format!(".partial-{}-", uuid::Uuid::new_v4().simple()));
    if let Some(file_name) = output.file_name() {
        name.push(file_name);
    }
    output.with_file_name(name)
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "Failed to remove leftover {}: {}",
            crate::sanitize::redact_path(path),
            e
        ),
    }
}
