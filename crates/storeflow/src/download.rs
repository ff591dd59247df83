//! Download artifact check.
//!
//! The confirmation step proves the order went through by downloading its
//! PDF. A file only counts once its size has been observed non-zero and
//! unchanged across two successive polls, so partially written files are
//! never accepted.

use crate::error::{SessionResult, WaitFailure};
use crate::session::Session;
use crate::wait::{await_condition, Probe, WaitCondition, WaitOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Where downloads land and how long to wait for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Download directory
    pub dir: PathBuf,
    /// Accepted file name suffix (case-insensitive)
    pub suffix: String,
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("target/test-downloads"),
            suffix: ".pdf".to_string(),
            timeout_ms: 15_000,
            poll_interval_ms: 500,
        }
    }
}

impl DownloadSettings {
    /// Wait options for the stability poll
    #[must_use]
    pub const fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout_ms: self.timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

/// A downloaded file whose size has settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// File path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Create `dir` if needed and remove any files already in it
pub fn clear_download_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Newest file in `dir` whose name ends with `suffix`
fn newest_match(dir: &Path, suffix: &str) -> std::io::Result<Option<DownloadedFile>> {
    let suffix = suffix.to_lowercase();
    let mut newest: Option<(std::time::SystemTime, DownloadedFile)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.ends_with(&suffix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((
                modified,
                DownloadedFile {
                    path: entry.path(),
                    size: meta.len(),
                },
            ));
        }
    }
    Ok(newest.map(|(_, file)| file))
}

/// Satisfied once a matching file has the same non-zero size on two polls
#[derive(Debug)]
pub struct DownloadStable {
    dir: PathBuf,
    suffix: String,
    last: Mutex<Option<DownloadedFile>>,
}

impl DownloadStable {
    /// Watch `dir` for a file ending in `suffix`
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WaitCondition for DownloadStable {
    type Output = DownloadedFile;

    async fn check(&self, _session: &dyn Session) -> SessionResult<Probe<DownloadedFile>> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match newest_match(&self.dir, &self.suffix) {
            Ok(Some(file)) => file,
            Ok(None) => {
                *last = None;
                return Ok(Probe::pending("no matching file"));
            }
            Err(err) => return Ok(Probe::pending(format!("cannot read directory: {err}"))),
        };
        let stable = current.size > 0 && last.as_ref() == Some(&current);
        debug!(path = %current.path.display(), size = current.size, stable, "download observed");
        if stable {
            // the next wait on this condition starts from a fresh observation
            *last = None;
            return Ok(Probe::Ready(current));
        }
        let observed = format!("{} at {} bytes", current.path.display(), current.size);
        *last = Some(current);
        Ok(Probe::Pending(Some(observed)))
    }

    fn description(&self) -> String {
        format!("stable *{} download in {}", self.suffix, self.dir.display())
    }
}

/// Wait for a download described by `settings` to finish writing
pub async fn await_download(
    session: &dyn Session,
    settings: &DownloadSettings,
) -> Result<DownloadedFile, WaitFailure> {
    let condition = DownloadStable::new(&settings.dir, &settings.suffix);
    let done = await_condition(session, &condition, settings.wait_options()).await?;
    info!(path = %done.value.path.display(), size = done.value.size, "download complete");
    Ok(done.value)
}
