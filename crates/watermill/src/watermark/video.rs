use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{WatermarkError, Watermarker};
use crate::sanitize::{overlay_text, redact_path};

/// Lines of ffmpeg stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPreset {
    /// Balanced speed and quality, label boxed in the bottom-right corner.
    Standard,
    /// Fastest encode for very large sources, smaller top-right label.
    Large,
}

/// Burns a text overlay into a video by shelling out to ffmpeg.
pub struct VideoWatermarker {
    ffmpeg: PathBuf,
    preset: VideoPreset,
    threads: usize,
}

impl VideoWatermarker {
    pub fn new(ffmpeg: impl Into<PathBuf>, preset: VideoPreset) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            preset,
            threads: encoder_threads(num_cpus::get()),
        }
    }

    pub fn preset(&self) -> VideoPreset {
        self.preset
    }

    fn filter(&self, label: &str) -> String {
        let text = format!("Licensed to {}", overlay_text(label));
        match self.preset {
            VideoPreset::Standard => format!(
                "drawtext=text='{}':x=w-tw-20:y=h-th-20:fontsize=32:fontcolor=white@0.8:box=1:boxcolor=black@0.4:boxborderw=8",
                text
            ),
            VideoPreset::Large => format!(
                "drawtext=text='{}':x=w-tw-10:y=10:fontsize=24:fontcolor=white@0.7:borderw=1:bordercolor=black@0.6",
                text
            ),
        }
    }

    /// Full ffmpeg argument list for one run.
    pub fn build_args(&self, input: &Path, output: &Path, label: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into()];
        args.extend(["-hwaccel", "auto"].map(OsString::from));
        if self.preset == VideoPreset::Large {
            args.extend(["-fflags", "+genpts"].map(OsString::from));
        }
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.push("-vf".into());
        args.push(self.filter(label).into());

        let encoder = match self.preset {
            VideoPreset::Standard => vec!["-c:v", "libx264", "-preset", "faster", "-crf", "28"],
            VideoPreset::Large => vec![
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-crf",
                "30",
                "-tune",
                "fastdecode",
            ],
        };
        args.extend(encoder.into_iter().map(OsString::from));
        args.push("-threads".into());
        args.push(self.threads.to_string().into());
        args.extend(["-c:a", "copy", "-movflags", "+faststart", "-y"].map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }
}

/// Encoder threads for a machine with `cpus` cores: three quarters of
/// them, at least one.
pub fn encoder_threads(cpus: usize) -> usize {
    (cpus * 3 / 4).max(1)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl Watermarker for VideoWatermarker {
    fn apply(&self, input: &Path, output: &Path, label: &str) -> Result<(), WatermarkError> {
        let _span = tracing::info_span!("watermark.video", preset = ?self.preset).entered();

        log::info!(
            "Running ffmpeg ({:?} preset, {} threads) on {}",
            self.preset,
            self.threads,
            redact_path(input)
        );

        let result = Command::new(&self.ffmpeg)
            .args(self.build_args(input, output, label))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WatermarkError::SpawnFailed {
                program: self.ffmpeg.clone(),
                source: e,
            })?;

        if !result.status.success() {
            return Err(WatermarkError::CommandFailed {
                program: "ffmpeg".to_string(),
                status: result.status.to_string(),
                stderr: stderr_tail(&result.stderr),
            });
        }

        if !output.exists() {
            return Err(WatermarkError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.preset {
            VideoPreset::Standard => "video",
            VideoPreset::Large => "video-large",
        }
    }
}
