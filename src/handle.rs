/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Download handle: configuration plus the `perform` entry point.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::downloader::{
    cancel_flag, FastestMirrorConfig, MirrorList, MirrorStatusFn, ProgressFn, SchedulerPolicy,
    TransferConfig, DEFAULT_CACHE_MAX_AGE,
};
use crate::error::{Error, Result};
use crate::metalink::Metalink;
use crate::repo;
use crate::result::RepoResult;
use crate::urlvars::UrlVars;

/// Supported repository layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoType {
    /// A repomd-based repository (`repodata/repomd.xml`).
    #[default]
    Repomd,
}

/// Proxy protocol for outgoing transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyType {
    #[default]
    Http,
    Socks4,
    Socks5,
}

impl ProxyType {
    fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

/// External signature checker invoked on the downloaded manifest when
/// `gpg_check` is enabled.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` (a detached armored signature) over `payload`.
    fn verify(&self, payload: &Path, signature: &Path) -> Result<()>;
}

/// Typed option values for [`Handle::set`].
///
/// Each variant carries its payload; out-of-range values are rejected
/// with [`Error::BadOption`] and leave the handle unchanged.
pub enum HandleOption {
    /// Base repository URLs
    Urls(Vec<String>),
    /// URL of a plain-text mirrorlist to fetch and parse
    MirrorlistUrl(String),
    /// URL of a metalink document to fetch and parse
    MetalinkUrl(String),
    /// Locate an existing local repository instead of downloading
    Local(bool),
    /// Enable HTTP authentication with `userpwd`
    HttpAuth(bool),
    /// Origin credentials as `user:password`
    UserPwd(String),
    /// Proxy host, optionally `host:port`
    Proxy(String),
    ProxyPort(u16),
    ProxyType(ProxyType),
    /// Enable proxy authentication with `proxy_userpwd`
    ProxyAuth(bool),
    /// Proxy credentials as `user:password`
    ProxyUserPwd(String),
    UserAgent(String),
    /// Maximum transfer speed in bytes/s, 0 = unlimited
    MaxSpeed(u64),
    ConnectTimeout(Duration),
    /// Seconds the rate may stay under `LowSpeedLimit` before aborting
    LowSpeedTime(Duration),
    /// Abort threshold in bytes/s
    LowSpeedLimit(u64),
    /// Global parallel download cap, 1..=20
    MaxParallelDownloads(usize),
    /// Per-mirror parallel download cap, at least 1
    MaxDownloadsPerMirror(usize),
    /// Mirrors tried per target, 0 = all
    MaxMirrorTries(usize),
    /// Reuse files recorded in the passed-in result
    Update(bool),
    /// Stop after building the mirror list
    FetchMirrors(bool),
    /// Install a termination-signal watcher for the duration of perform
    Interruptible(bool),
    /// Tolerate files the manifest lists but no mirror carries
    IgnoreMissing(bool),
    /// Abort the whole batch on the first failed target
    Failfast(bool),
    /// Verify the manifest signature via the configured verifier
    GpgCheck(bool),
    /// Verify file checksums from the manifest
    ChecksumCheck(bool),
    DestDir(PathBuf),
    RepoType(RepoType),
    /// Manifest records to download; empty = all
    DownloadList(Vec<String>),
    /// Manifest records to skip
    DownloadBlacklist(Vec<String>),
    /// URL variable substitutions
    VarSub(UrlVars),
    FastestMirror(bool),
    FastestMirrorCache(PathBuf),
    FastestMirrorMaxAge(Duration),
    FastestMirrorCb(MirrorStatusFn),
    ProgressCb(ProgressFn),
}

/// Configuration bag and entry point for repository downloads.
///
/// A handle is single-owner: `perform` takes `&mut self`, so two
/// concurrent performs on one handle cannot compile. After an
/// interrupted perform the handle must not be reused.
pub struct Handle {
    pub(crate) urls: Vec<String>,
    pub(crate) mirrorlist_url: Option<String>,
    pub(crate) metalink_url: Option<String>,
    pub(crate) local: bool,

    pub(crate) http_auth: bool,
    pub(crate) userpwd: Option<String>,
    pub(crate) proxy: Option<String>,
    pub(crate) proxy_port: u16,
    pub(crate) proxy_type: ProxyType,
    pub(crate) proxy_auth: bool,
    pub(crate) proxy_userpwd: Option<String>,
    pub(crate) user_agent: Option<String>,

    pub(crate) max_speed: u64,
    pub(crate) connect_timeout: Duration,
    pub(crate) low_speed_time: Duration,
    pub(crate) low_speed_limit: u64,

    pub(crate) max_parallel_downloads: usize,
    pub(crate) max_downloads_per_mirror: usize,
    pub(crate) max_mirror_tries: usize,

    pub(crate) update: bool,
    pub(crate) fetch_mirrors: bool,
    pub(crate) interruptible: bool,
    pub(crate) ignore_missing: bool,
    pub(crate) failfast: bool,
    pub(crate) gpg_check: bool,
    pub(crate) checksum_check: bool,
    pub(crate) destdir: PathBuf,
    pub(crate) repo_type: RepoType,
    pub(crate) download_list: Vec<String>,
    pub(crate) download_blacklist: Vec<String>,
    pub(crate) varsub: UrlVars,

    pub(crate) fastest_mirror: bool,
    pub(crate) fastest_mirror_cache: Option<PathBuf>,
    pub(crate) fastest_mirror_max_age: Duration,
    pub(crate) fastest_mirror_cb: Option<MirrorStatusFn>,

    pub(crate) progress_cb: Option<ProgressFn>,
    pub(crate) signature_verifier: Option<Arc<dyn SignatureVerifier>>,

    // Derived state of the last perform.
    pub(crate) mirrors: MirrorList,
    pub(crate) metalink: Option<Metalink>,
}

impl Default for Handle {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            mirrorlist_url: None,
            metalink_url: None,
            local: false,
            http_auth: false,
            userpwd: None,
            proxy: None,
            proxy_port: 1080,
            proxy_type: ProxyType::default(),
            proxy_auth: false,
            proxy_userpwd: None,
            user_agent: None,
            max_speed: 0,
            connect_timeout: Duration::from_secs(30),
            low_speed_time: Duration::from_secs(10),
            low_speed_limit: 1000,
            max_parallel_downloads: 3,
            max_downloads_per_mirror: 2,
            max_mirror_tries: 0,
            update: false,
            fetch_mirrors: false,
            interruptible: false,
            ignore_missing: false,
            failfast: false,
            gpg_check: false,
            checksum_check: true,
            destdir: PathBuf::from("."),
            repo_type: RepoType::default(),
            download_list: Vec::new(),
            download_blacklist: Vec::new(),
            varsub: UrlVars::new(),
            fastest_mirror: false,
            fastest_mirror_cache: None,
            fastest_mirror_max_age: DEFAULT_CACHE_MAX_AGE,
            fastest_mirror_cb: None,
            progress_cb: None,
            signature_verifier: None,
            mirrors: MirrorList::new(),
            metalink: None,
        }
    }
}

impl Handle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one option.
    pub fn set(&mut self, option: HandleOption) -> Result<()> {
        match option {
            HandleOption::Urls(urls) => self.urls = urls,
            HandleOption::MirrorlistUrl(url) => self.mirrorlist_url = Some(url),
            HandleOption::MetalinkUrl(url) => self.metalink_url = Some(url),
            HandleOption::Local(v) => self.local = v,
            HandleOption::HttpAuth(v) => self.http_auth = v,
            HandleOption::UserPwd(v) => {
                if !v.contains(':') {
                    return Err(Error::BadOption(
                        "userpwd must use the form user:password".to_string(),
                    ));
                }
                self.userpwd = Some(v);
            }
            HandleOption::Proxy(v) => self.proxy = Some(v),
            HandleOption::ProxyPort(v) => self.proxy_port = v,
            HandleOption::ProxyType(v) => self.proxy_type = v,
            HandleOption::ProxyAuth(v) => self.proxy_auth = v,
            HandleOption::ProxyUserPwd(v) => {
                if !v.contains(':') {
                    return Err(Error::BadOption(
                        "proxy-userpwd must use the form user:password".to_string(),
                    ));
                }
                self.proxy_userpwd = Some(v);
            }
            HandleOption::UserAgent(v) => self.user_agent = Some(v),
            HandleOption::MaxSpeed(v) => self.max_speed = v,
            HandleOption::ConnectTimeout(v) => self.connect_timeout = v,
            HandleOption::LowSpeedTime(v) => self.low_speed_time = v,
            HandleOption::LowSpeedLimit(v) => self.low_speed_limit = v,
            HandleOption::MaxParallelDownloads(v) => {
                if !(1..=20).contains(&v) {
                    return Err(Error::BadOption(format!(
                        "max-parallel-downloads must be in 1..=20, got {}",
                        v
                    )));
                }
                self.max_parallel_downloads = v;
            }
            HandleOption::MaxDownloadsPerMirror(v) => {
                if v < 1 {
                    return Err(Error::BadOption(
                        "max-downloads-per-mirror must be at least 1".to_string(),
                    ));
                }
                self.max_downloads_per_mirror = v;
            }
            HandleOption::MaxMirrorTries(v) => self.max_mirror_tries = v,
            HandleOption::Update(v) => self.update = v,
            HandleOption::FetchMirrors(v) => self.fetch_mirrors = v,
            HandleOption::Interruptible(v) => self.interruptible = v,
            HandleOption::IgnoreMissing(v) => self.ignore_missing = v,
            HandleOption::Failfast(v) => self.failfast = v,
            HandleOption::GpgCheck(v) => self.gpg_check = v,
            HandleOption::ChecksumCheck(v) => self.checksum_check = v,
            HandleOption::DestDir(v) => self.destdir = v,
            HandleOption::RepoType(v) => self.repo_type = v,
            HandleOption::DownloadList(v) => self.download_list = v,
            HandleOption::DownloadBlacklist(v) => self.download_blacklist = v,
            HandleOption::VarSub(v) => self.varsub = v,
            HandleOption::FastestMirror(v) => self.fastest_mirror = v,
            HandleOption::FastestMirrorCache(v) => self.fastest_mirror_cache = Some(v),
            HandleOption::FastestMirrorMaxAge(v) => self.fastest_mirror_max_age = v,
            HandleOption::FastestMirrorCb(v) => self.fastest_mirror_cb = Some(v),
            HandleOption::ProgressCb(v) => self.progress_cb = Some(v),
        }
        Ok(())
    }

    /// Install the external signature checker used by `gpg_check`.
    pub fn set_signature_verifier(&mut self, verifier: Arc<dyn SignatureVerifier>) {
        self.signature_verifier = Some(verifier);
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn destdir(&self) -> &Path {
        &self.destdir
    }

    /// Mirror list built by the last perform.
    pub fn mirrors(&self) -> &MirrorList {
        &self.mirrors
    }

    /// Metalink parsed by the last perform, if one was used.
    pub fn metalink(&self) -> Option<&Metalink> {
        self.metalink.as_ref()
    }

    pub(crate) fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            connect_timeout: self.connect_timeout,
            low_speed_limit: self.low_speed_limit,
            low_speed_time: self.low_speed_time,
            max_speed: self.max_speed,
            userpwd: self
                .userpwd
                .as_ref()
                .filter(|_| self.http_auth)
                .and_then(|v| split_userpwd(v)),
        }
    }

    pub(crate) fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            max_parallel: self.max_parallel_downloads,
            max_per_mirror: self.max_downloads_per_mirror,
            max_mirror_tries: self.max_mirror_tries,
            failfast: self.failfast,
        }
    }

    pub(crate) fn fastest_mirror_config(&self) -> FastestMirrorConfig {
        FastestMirrorConfig {
            cache_path: self.fastest_mirror_cache.clone(),
            max_age: self.fastest_mirror_max_age,
            status_cb: self.fastest_mirror_cb.clone(),
        }
    }

    /// Full proxy URL derived from `proxy`, `proxy_port`, `proxy_type`.
    pub(crate) fn proxy_url(&self) -> Option<String> {
        let proxy = self.proxy.as_deref()?;
        if proxy.contains("://") {
            return Some(proxy.to_string());
        }
        let host = proxy.to_string();
        if host.contains(':') {
            Some(format!("{}://{}", self.proxy_type.scheme(), host))
        } else {
            Some(format!(
                "{}://{}:{}",
                self.proxy_type.scheme(),
                host,
                self.proxy_port
            ))
        }
    }

    pub(crate) fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_nodelay(true)
            .user_agent(
                self.user_agent
                    .clone()
                    .unwrap_or_else(|| format!("repofetch/{}", env!("CARGO_PKG_VERSION"))),
            );

        if let Some(proxy_url) = self.proxy_url() {
            let mut proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| Error::BadOption(format!("proxy '{}': {}", proxy_url, e)))?;
            if self.proxy_auth {
                if let Some((user, password)) =
                    self.proxy_userpwd.as_ref().and_then(|v| split_userpwd(v))
                {
                    proxy = proxy.basic_auth(&user, &password);
                }
            }
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| Error::network("<client>", e.to_string()))
    }

    /// Download (or locate) the repository this handle describes.
    ///
    /// On success `result` holds the mirror list, parsed manifest, and
    /// file paths. On failure `result` is left untouched; partial files
    /// stay on disk for resumption by a later call.
    pub async fn perform(&mut self, result: &mut RepoResult) -> Result<()> {
        let cancel = cancel_flag();

        let watcher = if self.interruptible {
            Some(spawn_signal_watcher(cancel.clone()))
        } else {
            None
        };

        let outcome = repo::perform(self, result, cancel).await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        outcome
    }
}

/// Watch for the platform terminate signal and flip the cancel flag.
/// Aborted when perform returns, restoring default signal disposition.
fn spawn_signal_watcher(
    cancel: Arc<std::sync::atomic::AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = term.recv() => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("terminate signal received, cancelling downloads");
        cancel.store(true, Ordering::Relaxed);
    })
}

fn split_userpwd(value: &str) -> Option<(String, String)> {
    value
        .split_once(':')
        .map(|(user, password)| (user.to_string(), password.to_string()))
}
