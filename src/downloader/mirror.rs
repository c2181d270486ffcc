/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 */

//! Internal mirror list shared by all targets of one download batch.

use crate::metalink::Metalink;
use crate::mirrorlist::Mirrorlist;

/// Transfer protocol of a mirror URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Ftp,
    File,
    Other,
}

impl Protocol {
    pub fn detect(url: &str) -> Self {
        if url.starts_with('/') || url.starts_with("file://") {
            Protocol::File
        } else if url.starts_with("https://") {
            Protocol::Https
        } else if url.starts_with("http://") {
            Protocol::Http
        } else if url.starts_with("ftp://") {
            Protocol::Ftp
        } else {
            Protocol::Other
        }
    }
}

/// One mirror with its per-batch state.
#[derive(Debug, Clone)]
pub struct Mirror {
    pub url: String,
    /// 1..=100, higher is preferred
    pub preference: u8,
    /// Failed transfers charged to this mirror in the current batch
    pub fails: u32,
    pub protocol: Protocol,
    pub location: Option<String>,
}

impl Mirror {
    fn new(url: String, preference: u8, location: Option<String>) -> Self {
        let protocol = Protocol::detect(&url);
        Self {
            url,
            preference,
            fails: 0,
            protocol,
            location,
        }
    }
}

/// Ordered, URL-deduplicated list of mirrors.
///
/// Append order is preserved; only the fastest-mirror prober reorders.
#[derive(Debug, Clone, Default)]
pub struct MirrorList {
    mirrors: Vec<Mirror>,
}

impl MirrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one URL with default preference 100.
    ///
    /// Empty strings are ignored; a URL must carry a scheme (`://`) or be
    /// an absolute path. Exact-match duplicates are dropped without any
    /// URL normalization.
    pub fn append_url(&mut self, url: &str) {
        self.append_with(url, 100, None);
    }

    fn append_with(&mut self, url: &str, preference: u8, location: Option<String>) {
        if url.is_empty() {
            return;
        }
        if !url.contains("://") && !url.starts_with('/') {
            tracing::debug!(url, "ignoring mirror without scheme or absolute path");
            return;
        }
        if self.mirrors.iter().any(|m| m.url == url) {
            return;
        }
        self.mirrors
            .push(Mirror::new(url.to_string(), preference.clamp(1, 100), location));
    }

    /// Append every URL of a parsed mirrorlist, in order.
    pub fn append_mirrorlist(&mut self, mirrorlist: &Mirrorlist) {
        for url in &mirrorlist.urls {
            self.append_url(url);
        }
    }

    /// Append the mirrors of a parsed metalink.
    ///
    /// Entries with an empty URL are skipped. `trim_suffix` (the manifest
    /// path the metalink URLs point at) is removed from each URL end so
    /// that the stored mirror is a repository base URL. Entries keep their
    /// metalink preference; a higher preference sorts earlier, equal
    /// preferences keep source order.
    pub fn append_metalink(&mut self, metalink: &Metalink, trim_suffix: &str) {
        let mut urls: Vec<_> = metalink
            .urls
            .iter()
            .filter(|u| !u.url.is_empty())
            .collect();
        urls.sort_by_key(|u| std::cmp::Reverse(u.preference));

        for entry in urls {
            let url = entry.url.strip_suffix(trim_suffix).unwrap_or(&entry.url);
            self.append_with(url, entry.preference, entry.location.clone());
        }
    }

    /// Splice entries of another list, keeping their preferences and
    /// skipping URLs already present.
    pub fn append_list(&mut self, other: &MirrorList) {
        for mirror in &other.mirrors {
            self.append_with(&mirror.url, mirror.preference, mirror.location.clone());
        }
    }

    pub fn nth(&self, index: usize) -> Option<&Mirror> {
        self.mirrors.get(index)
    }

    pub fn nth_url(&self, index: usize) -> Option<&str> {
        self.mirrors.get(index).map(|m| m.url.as_str())
    }

    pub fn urls(&self) -> Vec<String> {
        self.mirrors.iter().map(|m| m.url.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mirror> {
        self.mirrors.iter()
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Charge one failure to a mirror.
    pub fn add_failure(&mut self, index: usize) {
        if let Some(m) = self.mirrors.get_mut(index) {
            m.fails += 1;
        }
    }

    /// Zero all failure counters. Runs at the start of every batch.
    pub fn reset_failures(&mut self) {
        for m in &mut self.mirrors {
            m.fails = 0;
        }
    }

    /// Reorder in place to match `order` (indices into the current list).
    /// Used by the fastest-mirror prober.
    pub(crate) fn reorder(&mut self, order: &[usize]) {
        debug_assert_eq!(order.len(), self.mirrors.len());
        let mut reordered = Vec::with_capacity(self.mirrors.len());
        for &i in order {
            reordered.push(self.mirrors[i].clone());
        }
        self.mirrors = reordered;
    }
}
