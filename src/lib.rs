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

//! Mirror-aware repository metadata and package download library.
//!
//! repofetch is a high-level client for repomd-style package
//! repositories: it builds a mirror list from base URLs, mirrorlist
//! files, and metalinks, optionally sorts it by measured latency, then
//! downloads the signed manifest and the content files it lists through
//! a parallel, failover-capable download engine with checksum
//! verification.
//!
//! ```no_run
//! use repofetch::{Handle, HandleOption, RepoResult};
//!
//! # async fn run() -> repofetch::Result<()> {
//! let mut handle = Handle::new();
//! handle.set(HandleOption::MetalinkUrl(
//!     "https://mirrors.example.org/metalink?repo=os".to_string(),
//! ))?;
//! handle.set(HandleOption::DestDir("/var/cache/repo".into()))?;
//!
//! let mut result = RepoResult::new();
//! handle.perform(&mut result).await?;
//! println!("primary at {:?}", result.path("primary"));
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod downloader;
pub mod error;
pub mod handle;
pub mod metalink;
pub mod mirrorlist;
mod repo;
pub mod repomd;
pub mod result;
pub mod urlvars;

pub use checksum::{Checksum, ChecksumKind};
pub use downloader::{
    Control, MirrorList, ProgressFn, Target, TargetOutcome, TargetState,
};
pub use error::{Error, Result};
pub use handle::{Handle, HandleOption, ProxyType, RepoType, SignatureVerifier};
pub use metalink::{Metalink, MetalinkHash, MetalinkUrl};
pub use mirrorlist::Mirrorlist;
pub use repomd::{Repomd, RepomdRecord};
pub use result::RepoResult;
pub use urlvars::UrlVars;
