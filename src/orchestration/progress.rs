//! Local progress log.
//!
//! A [`ResultSink`] that appends one JSON line per terminal outcome. Reloading
//! the log lets a crashed run resume without consulting the spreadsheet: the
//! last recorded outcome for each `(row_index, key)` is restored onto a freshly
//! loaded job list.

use crate::error::SinkError;
use crate::orchestration::{JobOutcome, JobRecord, ResultSink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Append-only JSON-lines log of job outcomes
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ProgressLog {
    /// Open for appending, creating the file (and parent directory) if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), "Progress log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed outcome in file order; corrupt lines are skipped
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<JobOutcome>, SinkError> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut outcomes = Vec::new();
        for (line_number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JobOutcome>(line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_number + 1,
                    error = %e,
                    "Skipping unreadable progress entry"
                ),
            }
        }
        Ok(outcomes)
    }

    /// Apply recorded terminal states to `jobs`; returns how many were restored
    pub async fn restore(&self, jobs: &mut [JobRecord]) -> Result<usize, SinkError> {
        let outcomes = Self::load(&self.path).await?;
        Ok(apply_outcomes(jobs, outcomes))
    }
}

/// Last outcome wins for each job identity
pub fn apply_outcomes(jobs: &mut [JobRecord], outcomes: Vec<JobOutcome>) -> usize {
    let mut latest: HashMap<(usize, String), JobOutcome> = HashMap::new();
    for outcome in outcomes.into_iter().filter(|o| o.status.is_terminal()) {
        latest.insert((outcome.row_index, outcome.key.clone()), outcome);
    }

    let mut restored = 0;
    for job in jobs.iter_mut() {
        if let Some(outcome) = latest.get(&(job.row_index, job.key.clone())) {
            job.status = outcome.status;
            job.attempt_count = outcome.attempt_count;
            job.error_kind = outcome.error_kind.clone();
            job.from_cache = outcome.from_cache;
            restored += 1;
        }
    }

    info!(restored, "Restored job states from progress log");
    restored
}

#[async_trait]
impl ResultSink for ProgressLog {
    async fn persist(&self, outcome: &JobOutcome) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
