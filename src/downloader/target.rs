/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 */

//! Download target descriptors and terminal states.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::checksum::Checksum;
use crate::error::Error;

/// Decision returned by a progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Abort,
}

/// Progress callback: `(total_bytes_if_known, downloaded_bytes)`.
///
/// Invoked at a bounded rate from the scheduler's execution context;
/// returning [`Control::Abort`] cancels the whole batch.
pub type ProgressFn = Arc<dyn Fn(Option<u64>, u64) -> Control + Send + Sync>;

/// End-of-target callback, delivered exactly once per target.
pub type EndFn = Arc<dyn Fn(&TargetOutcome) + Send + Sync>;

/// One file to download.
pub struct Target {
    /// Path relative to the mirror base URL.
    pub relative_path: String,
    /// Destination file path.
    pub dest: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_checksum: Option<Checksum>,
    /// Optional `(offset, length)` byte range; `None` length means
    /// "to end of file".
    pub byte_range: Option<(u64, Option<u64>)>,
    /// Continue a partial file instead of restarting it.
    pub resume: bool,
    /// Fixed base URL that bypasses the mirror list for this target.
    pub base_url: Option<String>,
    /// Indices into the mirror list this target may use; `None` = all.
    pub mirror_subset: Option<Vec<usize>>,
    pub progress: Option<ProgressFn>,
    pub end: Option<EndFn>,
}

impl Target {
    pub fn new(relative_path: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            dest: dest.into(),
            expected_size: None,
            expected_checksum: None,
            byte_range: None,
            resume: false,
            base_url: None,
            mirror_subset: None,
            progress: None,
            end: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_byte_range(mut self, offset: u64, length: Option<u64>) -> Self {
        self.byte_range = Some((offset, length));
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_end(mut self, end: EndFn) -> Self {
        self.end = Some(end);
        self
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("relative_path", &self.relative_path)
            .field("dest", &self.dest)
            .field("expected_size", &self.expected_size)
            .field("expected_checksum", &self.expected_checksum)
            .field("byte_range", &self.byte_range)
            .field("resume", &self.resume)
            .field("base_url", &self.base_url)
            .field("mirror_subset", &self.mirror_subset)
            .finish_non_exhaustive()
    }
}

/// Terminal state of one target.
#[derive(Debug)]
pub enum TargetState {
    Ok,
    Failed(Error),
}

impl TargetState {
    pub fn is_ok(&self) -> bool {
        matches!(self, TargetState::Ok)
    }
}

/// Final report for one target of a batch.
#[derive(Debug)]
pub struct TargetOutcome {
    pub relative_path: String,
    pub dest: PathBuf,
    /// URL the final attempt used, if any attempt was made.
    pub effective_url: Option<String>,
    /// Bytes moved by the final attempt.
    pub transferred: u64,
    pub state: TargetState,
}
