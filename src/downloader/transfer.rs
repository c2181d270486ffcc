/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 */

//! Single-transfer engine: one URL to one destination file.
//!
//! Everything above this module thinks in mirrors and targets; this
//! module performs exactly one attempt over HTTP(S) or the local
//! filesystem, with range resume, speed limits, and progress reporting.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

use super::target::{Control, ProgressFn};

/// Stall cutoff when no low-speed limit is configured.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Minimum spacing between two progress callbacks.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const COPY_CHUNK: usize = 64 * 1024;

/// Per-handle transfer tuning shared by every attempt.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub connect_timeout: Duration,
    /// Abort when the mean rate stays under `low_speed_limit` B/s for
    /// `low_speed_time`. A limit of 0 disables the check.
    pub low_speed_limit: u64,
    pub low_speed_time: Duration,
    /// Maximum transfer speed in B/s; 0 means unlimited.
    pub max_speed: u64,
    /// user:password for the origin server.
    pub userpwd: Option<(String, String)>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1000,
            low_speed_time: Duration::from_secs(10),
            max_speed: 0,
            userpwd: None,
        }
    }
}

/// One transfer attempt.
pub struct TransferRequest<'a> {
    pub url: String,
    pub dest: &'a Path,
    pub resume: bool,
    pub byte_range: Option<(u64, Option<u64>)>,
    pub expected_size: Option<u64>,
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for TransferRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("url", &self.url)
            .field("dest", &self.dest)
            .field("resume", &self.resume)
            .field("byte_range", &self.byte_range)
            .field("expected_size", &self.expected_size)
            .field("progress", &self.progress.as_ref().map(|_| "Fn"))
            .finish()
    }
}

/// What one successful attempt moved.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub url: String,
    /// Bytes written by this attempt (resume skips are not counted).
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Map a URL onto the local filesystem, if it points there.
pub fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        Some(PathBuf::from(rest))
    } else if url.starts_with('/') {
        Some(PathBuf::from(url))
    } else {
        None
    }
}

/// Join a mirror base URL and a repository-relative path.
pub fn join_url(base: &str, relative_path: &str) -> String {
    if relative_path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative_path.trim_start_matches('/')
    )
}

/// Perform one transfer.
///
/// `cancel` is polled between chunks; a set flag aborts with
/// [`Error::Interrupted`], leaving any partial file in place for a
/// later resume.
pub async fn fetch(
    client: &Client,
    cfg: &TransferConfig,
    req: TransferRequest<'_>,
    cancel: &AtomicBool,
) -> Result<TransferStats> {
    if let Some(path) = local_path(&req.url) {
        return fetch_local(cfg, &req, &path, cancel).await;
    }
    if req.url.starts_with("ftp://") {
        return Err(Error::NotSupported(format!(
            "ftp transfer of {}",
            req.url
        )));
    }
    fetch_http(client, cfg, req, cancel).await
}

async fn fetch_http(
    client: &Client,
    cfg: &TransferConfig,
    req: TransferRequest<'_>,
    cancel: &AtomicBool,
) -> Result<TransferStats> {
    let mut resume_offset = if req.resume {
        tokio::fs::metadata(req.dest).await.map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };

    loop {
        match fetch_http_once(client, cfg, &req, resume_offset, cancel).await {
            // Our partial file is longer than what the server has.
            // Throw it away and fetch from scratch.
            Err(Error::HttpStatus { status: 416, .. }) if resume_offset > 0 => {
                tracing::debug!(url = %req.url, "range not satisfiable, restarting full fetch");
                truncate(req.dest).await?;
                resume_offset = 0;
            }
            other => return other,
        }
    }
}

async fn fetch_http_once(
    client: &Client,
    cfg: &TransferConfig,
    req: &TransferRequest<'_>,
    resume_offset: u64,
    cancel: &AtomicBool,
) -> Result<TransferStats> {
    let start = Instant::now();

    let mut request = client.get(&req.url);
    if let Some((user, password)) = &cfg.userpwd {
        request = request.basic_auth(user, Some(password));
    }

    match req.byte_range {
        Some((offset, Some(length))) if length > 0 => {
            request = request.header(
                header::RANGE,
                format!("bytes={}-{}", offset, offset + length - 1),
            );
        }
        Some((offset, _)) => {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }
        None if resume_offset > 0 => {
            request = request.header(header::RANGE, format!("bytes={}-", resume_offset));
        }
        None => {}
    }

    let response = timeout(cfg.connect_timeout, request.send())
        .await
        .map_err(|_| Error::Timeout {
            url: req.url.clone(),
        })?
        .map_err(|e| Error::request(&req.url, e))?;

    let status = response.status();
    if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
        return Err(Error::HttpStatus {
            url: req.url.clone(),
            status: status.as_u16(),
        });
    }

    // A server that ignored our Range answers 200 with the whole body.
    let server_resumed = status == StatusCode::PARTIAL_CONTENT;
    let write_offset = if req.byte_range.is_none() && server_resumed {
        resume_offset
    } else {
        0
    };

    let total = req
        .expected_size
        .or_else(|| response.content_length().map(|l| l + write_offset));

    let mut file = open_dest(req.dest, write_offset).await?;
    let mut stream = response.bytes_stream();

    let limiter = rate_limiter(cfg.max_speed);
    let mut written = 0u64;
    let mut reporter = ProgressReporter::new(req.progress.clone(), total, write_offset);

    let stall_cutoff = if cfg.low_speed_limit > 0 {
        cfg.low_speed_time
    } else {
        STALL_TIMEOUT
    };
    let mut window_start = Instant::now();
    let mut window_bytes = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            file.flush().await.map_err(|e| Error::io(req.dest.display().to_string(), e))?;
            return Err(Error::Interrupted);
        }

        let chunk = match timeout(stall_cutoff, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return Err(Error::request(&req.url, e)),
            Ok(None) => break,
            Err(_) if cfg.low_speed_limit == 0 => {
                return Err(Error::Timeout {
                    url: req.url.clone(),
                })
            }
            Err(_) => {
                // Nothing arrived for a whole low-speed window.
                let rate = window_bytes / window_start.elapsed().as_secs().max(1);
                if rate < cfg.low_speed_limit {
                    return Err(Error::TooSlow {
                        url: req.url.clone(),
                        bytes_per_sec: rate,
                    });
                }
                window_start = Instant::now();
                window_bytes = 0;
                continue;
            }
        };

        throttle(&limiter, chunk.len()).await?;

        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io(req.dest.display().to_string(), e))?;
        written += chunk.len() as u64;
        window_bytes += chunk.len() as u64;

        if cfg.low_speed_limit > 0 && window_start.elapsed() >= cfg.low_speed_time {
            let rate = window_bytes / window_start.elapsed().as_secs().max(1);
            if rate < cfg.low_speed_limit {
                return Err(Error::TooSlow {
                    url: req.url.clone(),
                    bytes_per_sec: rate,
                });
            }
            window_start = Instant::now();
            window_bytes = 0;
        }

        reporter.report(written)?;
    }

    file.flush()
        .await
        .map_err(|e| Error::io(req.dest.display().to_string(), e))?;
    reporter.finish(written)?;

    Ok(TransferStats {
        url: req.url.clone(),
        bytes: written,
        elapsed: start.elapsed(),
    })
}

/// Stream a local file to the destination with the same progress and
/// cancellation behavior as a network transfer.
async fn fetch_local(
    cfg: &TransferConfig,
    req: &TransferRequest<'_>,
    source: &Path,
    cancel: &AtomicBool,
) -> Result<TransferStats> {
    let start = Instant::now();

    let mut src = File::open(source)
        .await
        .map_err(|e| Error::io(source.display().to_string(), e))?;
    let src_len = src
        .metadata()
        .await
        .map_err(|e| Error::io(source.display().to_string(), e))?
        .len();

    let (skip, limit) = match req.byte_range {
        Some((offset, length)) => (offset, length),
        None if req.resume => {
            let have = tokio::fs::metadata(req.dest).await.map(|m| m.len()).unwrap_or(0);
            // Resuming past the source length restarts from scratch.
            if have > src_len {
                truncate(req.dest).await?;
                (0, None)
            } else {
                (have, None)
            }
        }
        None => (0, None),
    };

    if skip > 0 {
        src.seek(std::io::SeekFrom::Start(skip))
            .await
            .map_err(|e| Error::io(source.display().to_string(), e))?;
    }

    let write_offset = if req.byte_range.is_none() { skip } else { 0 };
    let mut file = open_dest(req.dest, write_offset).await?;

    let total = req
        .expected_size
        .or(Some(limit.unwrap_or(src_len.saturating_sub(skip)) + write_offset));
    let mut reporter = ProgressReporter::new(req.progress.clone(), total, write_offset);
    let limiter = rate_limiter(cfg.max_speed);

    let mut remaining = limit.unwrap_or(u64::MAX);
    let mut written = 0u64;
    let mut buf = vec![0u8; COPY_CHUNK];

    while remaining > 0 {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Interrupted);
        }

        let want = remaining.min(COPY_CHUNK as u64) as usize;
        let n = src
            .read(&mut buf[..want])
            .await
            .map_err(|e| Error::io(source.display().to_string(), e))?;
        if n == 0 {
            break;
        }

        throttle(&limiter, n).await?;

        file.write_all(&buf[..n])
            .await
            .map_err(|e| Error::io(req.dest.display().to_string(), e))?;
        written += n as u64;
        remaining = remaining.saturating_sub(n as u64);

        reporter.report(written)?;
    }

    file.flush()
        .await
        .map_err(|e| Error::io(req.dest.display().to_string(), e))?;
    reporter.finish(written)?;

    Ok(TransferStats {
        url: req.url.clone(),
        bytes: written,
        elapsed: start.elapsed(),
    })
}

async fn open_dest(dest: &Path, write_offset: u64) -> Result<File> {
    let io_err = |e| Error::io(dest.display().to_string(), e);
    if write_offset > 0 {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(dest)
            .await
            .map_err(io_err)?;
        file.seek(std::io::SeekFrom::Start(write_offset))
            .await
            .map_err(io_err)?;
        Ok(file)
    } else {
        File::create(dest).await.map_err(io_err)
    }
}

async fn truncate(dest: &Path) -> Result<()> {
    File::create(dest)
        .await
        .map(|_| ())
        .map_err(|e| Error::io(dest.display().to_string(), e))
}

/// Token bucket over bytes: one cell per byte, burst = one second of
/// quota. Chunks larger than the burst are fed in pieces.
fn rate_limiter(max_speed: u64) -> Option<(DefaultDirectRateLimiter, u32)> {
    if max_speed == 0 {
        return None;
    }
    let rate = NonZeroU32::new(max_speed.min(u32::MAX as u64) as u32)
        .unwrap_or(NonZeroU32::new(1).unwrap());
    Some((RateLimiter::direct(Quota::per_second(rate)), rate.get()))
}

async fn throttle(limiter: &Option<(DefaultDirectRateLimiter, u32)>, len: usize) -> Result<()> {
    let Some((limiter, burst)) = limiter else {
        return Ok(());
    };
    let mut remaining = len as u64;
    while remaining > 0 {
        let n = remaining.min(u64::from(*burst)) as u32;
        let n = NonZeroU32::new(n).expect("chunk piece is non-zero");
        limiter
            .until_n_ready(n)
            .await
            .map_err(|_| Error::BadOption("max-speed quota exhausted mid-chunk".into()))?;
        remaining -= u64::from(n.get());
    }
    Ok(())
}

/// Rate-bounded progress reporting with monotonic byte counts.
struct ProgressReporter {
    callback: Option<ProgressFn>,
    total: Option<u64>,
    base: u64,
    last: Option<Instant>,
}

impl ProgressReporter {
    fn new(callback: Option<ProgressFn>, total: Option<u64>, base: u64) -> Self {
        Self {
            callback,
            total,
            base,
            last: None,
        }
    }

    fn report(&mut self, written: u64) -> Result<()> {
        let Some(cb) = &self.callback else {
            return Ok(());
        };
        let due = self.last.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
        if !due {
            return Ok(());
        }
        self.last = Some(Instant::now());
        match cb(self.total, self.base + written) {
            Control::Continue => Ok(()),
            Control::Abort => Err(Error::Interrupted),
        }
    }

    /// Final report, always delivered.
    fn finish(&mut self, written: u64) -> Result<()> {
        let Some(cb) = &self.callback else {
            return Ok(());
        };
        match cb(self.total, self.base + written) {
            Control::Continue => Ok(()),
            Control::Abort => Err(Error::Interrupted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://foo", "repodata/repomd.xml"), "http://foo/repodata/repomd.xml");
        assert_eq!(join_url("http://foo/", "/repodata/repomd.xml"), "http://foo/repodata/repomd.xml");
        assert_eq!(join_url("/srv/repo", "a/b"), "/srv/repo/a/b");
        assert_eq!(join_url("http://foo", ""), "http://foo");
    }

    #[test]
    fn test_local_path_detection() {
        assert_eq!(local_path("file:///srv/repo"), Some(PathBuf::from("/srv/repo")));
        assert_eq!(local_path("/srv/repo"), Some(PathBuf::from("/srv/repo")));
        assert_eq!(local_path("http://foo"), None);
    }

    #[tokio::test]
    async fn test_local_fetch() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        tokio::fs::write(&src, b"0123456789").await.unwrap();

        let cfg = TransferConfig::default();
        let stats = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: src.display().to_string(),
                dest: &dest,
                resume: false,
                byte_range: None,
                expected_size: None,
                progress: None,
            },
            &no_cancel(),
        )
        .await
        .unwrap();

        assert_eq!(stats.bytes, 10);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_local_fetch_resume() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        tokio::fs::write(&src, b"0123456789").await.unwrap();
        tokio::fs::write(&dest, b"0123").await.unwrap();

        let cfg = TransferConfig::default();
        let stats = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: format!("file://{}", src.display()),
                dest: &dest,
                resume: true,
                byte_range: None,
                expected_size: None,
                progress: None,
            },
            &no_cancel(),
        )
        .await
        .unwrap();

        // Only the missing tail moves.
        assert_eq!(stats.bytes, 6);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_local_fetch_byte_range() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        tokio::fs::write(&src, b"0123456789").await.unwrap();

        let cfg = TransferConfig::default();
        fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: src.display().to_string(),
                dest: &dest,
                resume: false,
                byte_range: Some((2, Some(5))),
                expected_size: None,
                progress: None,
            },
            &no_cancel(),
        )
        .await
        .unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"23456");
    }

    #[tokio::test]
    async fn test_local_fetch_missing_source() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest.bin");

        let cfg = TransferConfig::default();
        let err = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: dir.path().join("absent").display().to_string(),
                dest: &dest,
                resume: false,
                byte_range: None,
                expected_size: None,
                progress: None,
            },
            &no_cancel(),
        )
        .await
        .unwrap_err();

        assert!(err.is_missing_file());
    }

    #[tokio::test]
    async fn test_ftp_not_supported() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        let cfg = TransferConfig::default();
        let err = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: "ftp://mirror/file".to_string(),
                dest: &dest,
                resume: false,
                byte_range: None,
                expected_size: None,
                progress: None,
            },
            &no_cancel(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_progress_abort_interrupts() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        tokio::fs::write(&src, vec![7u8; 4 * COPY_CHUNK]).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let progress: ProgressFn = Arc::new(move |_total, _done| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Control::Abort
        });

        let cfg = TransferConfig::default();
        let err = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: src.display().to_string(),
                dest: &dest,
                resume: false,
                byte_range: None,
                expected_size: None,
                progress: Some(progress),
            },
            &no_cancel(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cancel_flag_interrupts() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("dest.bin");
        tokio::fs::write(&src, b"data").await.unwrap();

        let cancel = AtomicBool::new(true);
        let cfg = TransferConfig::default();
        let err = fetch(
            &Client::new(),
            &cfg,
            TransferRequest {
                url: src.display().to_string(),
                dest: &dest,
                resume: false,
                byte_range: None,
                expected_size: None,
                progress: None,
            },
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
    }
}
