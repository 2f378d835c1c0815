//! Append-only persistence of attempt records and captured output.
//!
//! Layout under the results directory:
//!
//! ```text
//! results/
//!   attempts.jsonl             one JSON Attempt per line
//!   outputs/<attempt_id>.out   raw client stdout of successful attempts
//!   summary-<campaign>.json    CampaignResult, written once per campaign
//! ```
//!
//! Every write holds one lock for its duration, so concurrent runners never
//! interleave partial content. Nothing is overwritten or reordered.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{RecorderError, RecorderResult};
use crate::types::{Attempt, AttemptId, CampaignResult};

/// File name of the attempt log.
pub const ATTEMPT_LOG: &str = "attempts.jsonl";

/// Directory name for captured outputs.
pub const OUTPUT_DIR: &str = "outputs";

/// Lock-guarded writer for one results directory.
#[derive(Debug)]
pub struct ResultRecorder {
    dir: PathBuf,
    log: Mutex<tokio::fs::File>,
}

impl ResultRecorder {
    /// Open (creating if needed) a results directory for appending.
    pub async fn open(dir: &Path) -> RecorderResult<Self> {
        tokio::fs::create_dir_all(dir.join(OUTPUT_DIR)).await?;
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(ATTEMPT_LOG))
            .await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            log: Mutex::new(log),
        })
    }

    /// Path an attempt's output is saved to.
    pub fn output_path(&self, attempt_id: &AttemptId) -> PathBuf {
        self.dir
            .join(OUTPUT_DIR)
            .join(format!("{}.out", attempt_id))
    }

    /// Append one attempt record as a JSON line.
    pub async fn record(&self, attempt: &Attempt) -> RecorderResult<()> {
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');

        let mut log = self.log.lock().await;
        log.write_all(&line).await?;
        log.flush().await?;
        Ok(())
    }

    /// Save raw output bytes for an attempt. Fails if already saved.
    pub async fn save_output(&self, attempt_id: &AttemptId, bytes: &[u8]) -> RecorderResult<PathBuf> {
        let path = self.output_path(attempt_id);

        let _log = self.log.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => RecorderError::OutputExists { path: path.clone() },
                _ => RecorderError::Io(e),
            })?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Write the campaign summary next to the log.
    pub async fn write_summary(&self, result: &CampaignResult) -> RecorderResult<PathBuf> {
        let path = self
            .dir
            .join(format!("summary-{}.json", result.campaign_id));
        let contents = serde_json::to_vec_pretty(result)?;

        let _log = self.log.lock().await;
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

/// Read every record from a results directory's attempt log.
pub async fn read_attempts(dir: &Path) -> RecorderResult<Vec<Attempt>> {
    let contents = match tokio::fs::read_to_string(dir.join(ATTEMPT_LOG)).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(RecorderError::from))
        .collect()
}
