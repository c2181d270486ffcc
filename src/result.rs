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

//! Outcome container for a repository download.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::metalink::Metalink;
use crate::repomd::Repomd;

/// Result of one [`Handle::perform`](crate::Handle::perform) call.
///
/// A failed perform leaves a passed-in result exactly as it was; fields
/// are only written once the whole operation succeeded. A populated
/// result can be handed back to a later `update` perform, which reuses
/// the files it already names.
#[derive(Debug, Clone, Default)]
pub struct RepoResult {
    /// Directory the files were placed in.
    pub destdir: Option<PathBuf>,
    /// Parsed manifest of the repository.
    pub repomd: Option<Repomd>,
    /// Parsed metalink, when one was used to find mirrors.
    pub metalink: Option<Metalink>,
    /// Mirror URLs the download drew from, in scheduling order.
    pub mirrors: Vec<String>,
    /// Downloaded (or, in local mode, located) files by logical name.
    pub paths: HashMap<String, PathBuf>,
}

impl RepoResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of one downloaded file, by its manifest name.
    pub fn path(&self, name: &str) -> Option<&PathBuf> {
        self.paths.get(name)
    }

    /// True once a perform has populated this result.
    pub fn is_populated(&self) -> bool {
        self.repomd.is_some() || !self.mirrors.is_empty()
    }
}
