#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use watermill::{WatermarkError, Watermarker};

/// One call made to a fake transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub transform: &'static str,
    pub input: PathBuf,
    pub output: PathBuf,
    pub label: String,
}

pub type CallLog = Arc<Mutex<Vec<Invocation>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Copies the input and appends the label, logging every call.
pub struct StampWatermarker {
    name: &'static str,
    calls: CallLog,
    delay: Duration,
}

impl StampWatermarker {
    pub fn new(name: &'static str, calls: CallLog) -> Self {
        Self {
            name,
            calls,
            delay: Duration::ZERO,
        }
    }

    /// Sleeps before writing, to keep jobs in `processing` for a while.
    pub fn slow(name: &'static str, calls: CallLog, delay: Duration) -> Self {
        Self { name, calls, delay }
    }
}

impl Watermarker for StampWatermarker {
    fn apply(&self, input: &Path, output: &Path, label: &str) -> Result<(), WatermarkError> {
        self.calls.lock().unwrap().push(Invocation {
            transform: self.name,
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            label: label.to_string(),
        });
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let mut body = std::fs::read(input).map_err(|e| WatermarkError::ReadSource {
            path: input.to_path_buf(),
            source: e,
        })?;
        body.extend_from_slice(format!("\nLicensed to: {}", label).as_bytes());
        std::fs::write(output, body).map_err(|e| WatermarkError::ReadSource {
            path: output.to_path_buf(),
            source: e,
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Reports success without writing anything.
pub struct NoOutputWatermarker {
    pub calls: Arc<AtomicUsize>,
}

impl NoOutputWatermarker {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Watermarker for NoOutputWatermarker {
    fn apply(&self, _: &Path, _: &Path, _: &str) -> Result<(), WatermarkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "no-output"
    }
}
