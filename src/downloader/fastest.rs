/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 */

//! Fastest-mirror probing with a persisted latency cache.
//!
//! Probes are connect-only: no request body is exchanged, only the time
//! to establish a TCP connection is measured. Results are cached on disk
//! so repeated runs within the max-age window skip the network entirely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::mirror::MirrorList;
use super::transfer::local_path;

/// Callback reporting one probed mirror: `(url, latency_ms)`.
/// Unreachable mirrors report [`f64::INFINITY`].
pub type MirrorStatusFn = Arc<dyn Fn(&str, f64) + Send + Sync>;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_CONCURRENT_PROBES: usize = 10;

/// Default cache entry lifetime: 30 days.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(2_592_000);

/// Prober configuration.
#[derive(Clone, Default)]
pub struct FastestMirrorConfig {
    /// Latency cache location; `None` disables caching.
    pub cache_path: Option<PathBuf>,
    /// Cache entries older than this are re-probed. Zero means the
    /// cache is never trusted.
    pub max_age: Duration,
    pub status_cb: Option<MirrorStatusFn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: i64,
    connect_time_ms: f64,
}

/// On-disk latency cache, a JSON map keyed by mirror URL.
#[derive(Debug, Default)]
pub struct LatencyCache {
    entries: HashMap<String, CacheEntry>,
}

impl LatencyCache {
    /// Load a cache file, dropping entries older than `max_age`.
    ///
    /// Every failure is soft: an unreadable or corrupt cache behaves
    /// like an empty one.
    pub fn load(path: &Path, max_age: Duration) -> Self {
        let mut entries: HashMap<String, CacheEntry> = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read fastest-mirror cache");
                }
                HashMap::new()
            }
        };

        let now = chrono::Utc::now().timestamp();
        let max_age_secs = max_age.as_secs() as i64;
        entries.retain(|_, entry| max_age_secs > 0 && now - entry.timestamp <= max_age_secs);

        Self { entries }
    }

    pub fn get(&self, url: &str) -> Option<f64> {
        self.entries.get(url).map(|e| e.connect_time_ms)
    }

    pub fn insert(&mut self, url: &str, connect_time_ms: f64) {
        // Unreachable probes are not worth remembering; the mirror may
        // come back before the cache expires.
        if !connect_time_ms.is_finite() {
            return;
        }
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                timestamp: chrono::Utc::now().timestamp(),
                connect_time_ms,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist atomically: write a sibling temp file, then rename over
    /// the cache. Failure is soft.
    pub fn store(&self, path: &Path) {
        let content = match serde_json::to_string_pretty(&self.entries) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "cannot serialize fastest-mirror cache");
                return;
            }
        };

        let tmp = path.with_extension("tmp");
        let result = std::fs::write(&tmp, content).and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "cannot persist fastest-mirror cache");
            let _ = std::fs::remove_file(&tmp);
        }
    }
}

/// `(host, port)` to probe for a mirror URL, or `None` for local paths
/// and unparseable URLs.
fn probe_address(mirror_url: &str) -> Option<(String, u16)> {
    if local_path(mirror_url).is_some() {
        return None;
    }
    let parsed = url::Url::parse(mirror_url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}

async fn probe(url: &str) -> f64 {
    let Some((host, port)) = probe_address(url) else {
        // Local repositories win every race.
        return if local_path(url).is_some() { 0.0 } else { f64::INFINITY };
    };

    let start = Instant::now();
    match timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => start.elapsed().as_secs_f64() * 1000.0,
        Ok(Err(e)) => {
            tracing::debug!(url, error = %e, "mirror probe failed");
            f64::INFINITY
        }
        Err(_) => {
            tracing::debug!(url, "mirror probe timed out");
            f64::INFINITY
        }
    }
}

/// Probe every mirror and sort the list ascending by latency.
///
/// Ties keep their original order, so equal-latency mirrors stay in
/// preference order. Cache I/O never fails the sort.
pub async fn sort_by_speed(mirrors: &mut MirrorList, cfg: &FastestMirrorConfig) {
    if mirrors.len() < 2 && cfg.cache_path.is_none() {
        return;
    }

    let mut cache = match &cfg.cache_path {
        Some(path) => LatencyCache::load(path, cfg.max_age),
        None => LatencyCache::default(),
    };

    let urls = mirrors.urls();
    let mut latencies: Vec<Option<f64>> = urls.iter().map(|u| cache.get(u)).collect();

    let missing: Vec<(usize, String)> = latencies
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_none())
        .map(|(i, _)| (i, urls[i].clone()))
        .collect();

    tracing::debug!(
        total = urls.len(),
        cached = urls.len() - missing.len(),
        "probing mirrors"
    );

    let probed: Vec<(usize, f64)> = futures::stream::iter(missing)
        .map(|(i, url)| async move { (i, probe(&url).await) })
        .buffer_unordered(MAX_CONCURRENT_PROBES)
        .collect()
        .await;

    for (i, latency) in probed {
        latencies[i] = Some(latency);
        cache.insert(&urls[i], latency);
    }

    if let Some(cb) = &cfg.status_cb {
        for (url, latency) in urls.iter().zip(&latencies) {
            cb(url, latency.unwrap_or(f64::INFINITY));
        }
    }

    let mut order: Vec<usize> = (0..urls.len()).collect();
    order.sort_by(|&a, &b| {
        latencies[a]
            .unwrap_or(f64::INFINITY)
            .total_cmp(&latencies[b].unwrap_or(f64::INFINITY))
    });
    mirrors.reorder(&order);

    if let Some(path) = &cfg.cache_path {
        cache.store(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_probe_address() {
        assert_eq!(
            probe_address("http://mirror.example.org/fedora"),
            Some(("mirror.example.org".to_string(), 80))
        );
        assert_eq!(
            probe_address("https://mirror.example.org:8443/x"),
            Some(("mirror.example.org".to_string(), 8443))
        );
        assert_eq!(
            probe_address("ftp://ftp.example.org/pub"),
            Some(("ftp.example.org".to_string(), 21))
        );
        assert_eq!(probe_address("/srv/repo"), None);
        assert_eq!(probe_address("file:///srv/repo"), None);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fastestmirror.json");

        let mut cache = LatencyCache::default();
        cache.insert("http://foo", 12.5);
        cache.insert("http://bar", 80.0);
        cache.insert("http://dead", f64::INFINITY);
        cache.store(&path);

        let reloaded = LatencyCache::load(&path, DEFAULT_CACHE_MAX_AGE);
        assert_eq!(reloaded.get("http://foo"), Some(12.5));
        assert_eq!(reloaded.get("http://bar"), Some(80.0));
        // Unreachable probes are not cached.
        assert_eq!(reloaded.get("http://dead"), None);
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_cache_zero_max_age_never_trusted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = LatencyCache::default();
        cache.insert("http://foo", 5.0);
        cache.store(&path);

        let reloaded = LatencyCache::load(&path, Duration::ZERO);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_cache_corrupt_file_soft_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = LatencyCache::load(&path, DEFAULT_CACHE_MAX_AGE);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sort_prefers_local_over_unreachable() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("repo");
        std::fs::create_dir_all(&local).unwrap();

        let mut mirrors = MirrorList::new();
        // Reserved TEST-NET-1 address: connect fails or times out.
        mirrors.append_url("http://192.0.2.1/fedora");
        mirrors.append_url(&local.display().to_string());

        let cfg = FastestMirrorConfig {
            cache_path: None,
            max_age: DEFAULT_CACHE_MAX_AGE,
            status_cb: None,
        };
        sort_by_speed(&mut mirrors, &cfg).await;

        assert_eq!(mirrors.nth_url(0), Some(local.display().to_string().as_str()));
    }

    #[tokio::test]
    async fn test_sort_ties_keep_order_and_cb_fires() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let mut mirrors = MirrorList::new();
        mirrors.append_url(&a.display().to_string());
        mirrors.append_url(&b.display().to_string());

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cfg = FastestMirrorConfig {
            cache_path: None,
            max_age: DEFAULT_CACHE_MAX_AGE,
            status_cb: Some(Arc::new(move |url, latency| {
                seen2.lock().unwrap().push((url.to_string(), latency));
            })),
        };
        sort_by_speed(&mut mirrors, &cfg).await;

        // Both probe at zero latency; insertion order survives.
        assert_eq!(mirrors.nth_url(0), Some(a.display().to_string().as_str()));
        assert_eq!(mirrors.nth_url(1), Some(b.display().to_string().as_str()));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_written_after_sort() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("repo");
        std::fs::create_dir_all(&local).unwrap();
        let cache_path = dir.path().join("fastestmirror.json");

        let mut mirrors = MirrorList::new();
        mirrors.append_url(&local.display().to_string());

        let cfg = FastestMirrorConfig {
            cache_path: Some(cache_path.clone()),
            max_age: DEFAULT_CACHE_MAX_AGE,
            status_cb: None,
        };
        sort_by_speed(&mut mirrors, &cfg).await;

        let cache = LatencyCache::load(&cache_path, DEFAULT_CACHE_MAX_AGE);
        assert_eq!(cache.get(&local.display().to_string()), Some(0.0));
    }
}
