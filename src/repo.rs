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

//! Repository orchestration: mirrors, manifest, content files.
//!
//! Drives one `perform`: build the mirror list from every configured
//! source, optionally sort it by speed, download and verify the
//! manifest, then fan the listed files out through the scheduler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use reqwest::Client;

use crate::checksum::{self, Checksum, ChecksumKind};
use crate::downloader::{
    batch_error, download_all, fastest, scheduler::SchedulerPolicy, transfer::local_path,
    MirrorList, Target, TargetState, TransferConfig,
};
use crate::error::{Error, Result};
use crate::handle::{Handle, RepoType};
use crate::metalink::Metalink;
use crate::mirrorlist::Mirrorlist;
use crate::repomd::Repomd;
use crate::result::RepoResult;

/// Fixed manifest location for repomd repositories.
const MANIFEST_PATH: &str = "repodata/repomd.xml";
/// Detached signature next to the manifest.
const MANIFEST_SIGNATURE_PATH: &str = "repodata/repomd.xml.asc";
/// Result key of the manifest itself.
const MANIFEST_NAME: &str = "repomd";

/// Repository-relative manifest path for the handle's repository type.
fn manifest_path(repo_type: RepoType) -> &'static str {
    match repo_type {
        RepoType::Repomd => MANIFEST_PATH,
    }
}

pub(crate) async fn perform(
    handle: &mut Handle,
    result: &mut RepoResult,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    if handle.urls.is_empty() && handle.mirrorlist_url.is_none() && handle.metalink_url.is_none() {
        return Err(Error::BadArgument(
            "no base URL, mirrorlist URL, or metalink URL configured".to_string(),
        ));
    }

    let client = handle.build_client()?;
    let cfg = handle.transfer_config();
    let policy = handle.scheduler_policy();

    tokio::fs::create_dir_all(&handle.destdir)
        .await
        .map_err(|e| Error::io(handle.destdir.display().to_string(), e))?;

    // Mirror acquisition: base URLs, then mirrorlist, then metalink.
    let mut mirrors = MirrorList::new();
    for url in &handle.urls {
        mirrors.append_url(&handle.varsub.substitute(url));
    }

    let mut metalink_parsed: Option<Metalink> = None;

    if let Some(mirrorlist_url) = handle.mirrorlist_url.clone() {
        let url = handle.varsub.substitute(&mirrorlist_url);
        let text = fetch_document(&client, &cfg, &policy, &url, &handle.destdir, "mirrorlist", &cancel)
            .await?;
        let parsed = Mirrorlist::parse_str(&text)?;
        let expanded = Mirrorlist {
            urls: parsed
                .urls
                .iter()
                .map(|u| handle.varsub.substitute(u))
                .collect(),
        };
        tracing::debug!(count = expanded.len(), "mirrorlist fetched");
        mirrors.append_mirrorlist(&expanded);
    }

    if let Some(metalink_url) = handle.metalink_url.clone() {
        let url = handle.varsub.substitute(&metalink_url);
        let text = fetch_document(&client, &cfg, &policy, &url, &handle.destdir, "metalink.xml", &cancel)
            .await?;
        let parsed = Metalink::parse(&text, Some("repomd.xml"))?;
        let mut expanded = parsed.clone();
        for entry in &mut expanded.urls {
            entry.url = handle.varsub.substitute(&entry.url);
        }
        tracing::debug!(count = expanded.urls.len(), "metalink fetched");
        mirrors.append_metalink(&expanded, &format!("/{}", manifest_path(handle.repo_type)));
        metalink_parsed = Some(parsed);
    }

    if mirrors.is_empty() {
        return Err(Error::BadArgument("no usable mirror".to_string()));
    }
    mirrors.reset_failures();

    // Fastest-mirror pass.
    if handle.fastest_mirror {
        fastest::sort_by_speed(&mut mirrors, &handle.fastest_mirror_config()).await;
    }

    // Mirrors-only short-circuit.
    if handle.fetch_mirrors {
        result.destdir = Some(handle.destdir.clone());
        result.mirrors = mirrors.urls();
        result.metalink = metalink_parsed.clone();
        handle.mirrors = mirrors;
        handle.metalink = metalink_parsed;
        return Ok(());
    }

    // Local mode never touches the network.
    if handle.local {
        return perform_local(handle, result, mirrors, metalink_parsed).await;
    }

    // Manifest download through the single-target scheduler path.
    let manifest_rel = manifest_path(handle.repo_type);
    let manifest_dest = handle.destdir.join(manifest_rel);
    ensure_parent(&manifest_dest).await?;
    let manifest_target = with_handle_callbacks(handle, Target::new(manifest_rel, &manifest_dest));
    let mut outcomes = download_all(
        &client,
        &cfg,
        &mut mirrors,
        vec![manifest_target],
        &policy,
        cancel.clone(),
    )
    .await;
    batch_error(&mut outcomes)?;

    // Manifest verification against the metalink, then the signature.
    if let Some(metalink) = &metalink_parsed {
        verify_manifest(&manifest_dest, metalink, handle.checksum_check).await?;
    }
    if handle.gpg_check {
        verify_signature(handle, &client, &cfg, &policy, &mut mirrors, &manifest_dest, &cancel)
            .await?;
    }

    let manifest_xml = tokio::fs::read_to_string(&manifest_dest)
        .await
        .map_err(|e| Error::io(manifest_dest.display().to_string(), e))?;
    let repomd = Repomd::parse(&manifest_xml)?;

    // Content downloads.
    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    paths.insert(MANIFEST_NAME.to_string(), manifest_dest.clone());

    let mut targets: Vec<Target> = Vec::new();
    let mut target_names: Vec<String> = Vec::new();

    for record in repomd.records.iter().filter(|r| record_wanted(handle, &r.name)) {
        let dest = handle.destdir.join(&record.location);
        ensure_parent(&dest).await?;

        let expected = record_checksum(record, handle.checksum_check);

        if handle.update {
            if let Some(reused) = reusable_path(result, &record.name, &dest, expected.as_ref()).await
            {
                tracing::debug!(name = %record.name, "reusing up-to-date file");
                paths.insert(record.name.clone(), reused);
                continue;
            }
        }

        let mut target = Target::new(record.location.clone(), &dest);
        if let Some(size) = record.size {
            target = target.with_size(size as u64);
        }
        if let Some(expected) = expected {
            target = target.with_checksum(expected);
        }
        targets.push(with_handle_callbacks(handle, target));
        target_names.push(record.name.clone());
    }

    let mut outcomes = download_all(&client, &cfg, &mut mirrors, targets, &policy, cancel).await;

    // A 404 is tolerable when the caller said so; the file is simply
    // absent from the result.
    if handle.ignore_missing {
        for outcome in &mut outcomes {
            if let TargetState::Failed(e) = &outcome.state {
                if e.is_missing_file() {
                    tracing::warn!(path = %outcome.relative_path, "ignoring missing file");
                    outcome.state = TargetState::Ok;
                    outcome.effective_url = None;
                }
            }
        }
    }
    batch_error(&mut outcomes)?;

    for (name, outcome) in target_names.iter().zip(&outcomes) {
        if outcome.effective_url.is_some() {
            paths.insert(name.clone(), outcome.dest.clone());
        }
    }

    result.destdir = Some(handle.destdir.clone());
    result.repomd = Some(repomd);
    result.metalink = metalink_parsed.clone();
    result.mirrors = mirrors.urls();
    result.paths = paths;
    handle.mirrors = mirrors;
    handle.metalink = metalink_parsed;

    Ok(())
}

/// Locate an existing repository on the filesystem.
async fn perform_local(
    handle: &mut Handle,
    result: &mut RepoResult,
    mirrors: MirrorList,
    metalink_parsed: Option<Metalink>,
) -> Result<()> {
    let base = handle
        .urls
        .first()
        .ok_or_else(|| Error::BadArgument("local mode needs a base URL".to_string()))?;
    let base = handle.varsub.substitute(base);
    let base_path = local_path(&base).ok_or_else(|| {
        Error::BadArgument(format!("local mode needs a filesystem base URL, got '{}'", base))
    })?;

    let manifest_file = base_path.join(manifest_path(handle.repo_type));
    let manifest_xml = tokio::fs::read_to_string(&manifest_file)
        .await
        .map_err(|e| Error::io(manifest_file.display().to_string(), e))?;
    let repomd = Repomd::parse(&manifest_xml)?;

    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    paths.insert(MANIFEST_NAME.to_string(), manifest_file);

    for record in repomd.records.iter().filter(|r| record_wanted(handle, &r.name)) {
        let path = base_path.join(&record.location);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            paths.insert(record.name.clone(), path);
        } else if !handle.ignore_missing {
            return Err(Error::IncompleteRepo(format!(
                "'{}' is listed but missing at {}",
                record.name,
                path.display()
            )));
        }
    }

    result.destdir = Some(base_path);
    result.repomd = Some(repomd);
    result.metalink = metalink_parsed.clone();
    result.mirrors = mirrors.urls();
    result.paths = paths;
    handle.mirrors = mirrors;
    handle.metalink = metalink_parsed;

    Ok(())
}

/// Fetch a small control document (mirrorlist or metalink) into destdir
/// and hand back its text. Runs as a one-target batch so retry policy
/// and cancellation behave like any other download.
#[allow(clippy::too_many_arguments)]
async fn fetch_document(
    client: &Client,
    cfg: &TransferConfig,
    policy: &SchedulerPolicy,
    url: &str,
    destdir: &Path,
    filename: &str,
    cancel: &Arc<AtomicBool>,
) -> Result<String> {
    let dest = destdir.join(filename);
    let target = Target::new("", &dest).with_base_url(url);

    let mut scratch = MirrorList::new();
    let mut outcomes = download_all(
        client,
        cfg,
        &mut scratch,
        vec![target],
        policy,
        cancel.clone(),
    )
    .await;
    batch_error(&mut outcomes)?;

    tokio::fs::read_to_string(&dest)
        .await
        .map_err(|e| Error::io(dest.display().to_string(), e))
}

/// Size and hash gate for the downloaded manifest, fed by the metalink.
async fn verify_manifest(manifest: &Path, metalink: &Metalink, checksum_check: bool) -> Result<()> {
    if metalink.size > 0 {
        let actual = tokio::fs::metadata(manifest)
            .await
            .map_err(|e| Error::io(manifest.display().to_string(), e))?
            .len();
        if actual != metalink.size as u64 {
            return Err(Error::ChecksumMismatch {
                file: manifest.display().to_string(),
                expected: format!("{} bytes", metalink.size),
                actual: format!("{} bytes", actual),
            });
        }
    }

    if !checksum_check {
        return Ok(());
    }

    // Strongest known hash wins; unknown types are skipped.
    let preference = [
        ChecksumKind::Sha512,
        ChecksumKind::Sha256,
        ChecksumKind::Sha1,
        ChecksumKind::Md5,
    ];
    let best = preference.iter().find_map(|kind| {
        metalink
            .hashes
            .iter()
            .find(|h| h.kind.parse::<ChecksumKind>().ok() == Some(*kind))
            .map(|h| Checksum::new(*kind, h.hex.clone()))
    });

    match best {
        Some(expected) => checksum::verify(manifest, &expected).await,
        None => Ok(()),
    }
}

/// Download the detached manifest signature and run the configured
/// verifier over it.
async fn verify_signature(
    handle: &Handle,
    client: &Client,
    cfg: &TransferConfig,
    policy: &SchedulerPolicy,
    mirrors: &mut MirrorList,
    manifest: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<()> {
    let verifier = handle
        .signature_verifier
        .clone()
        .ok_or_else(|| Error::GpgNotVerified("repomd.xml (no verifier configured)".to_string()))?;

    let signature_dest = handle.destdir.join(MANIFEST_SIGNATURE_PATH);
    ensure_parent(&signature_dest).await?;
    let target = Target::new(MANIFEST_SIGNATURE_PATH, &signature_dest);
    let mut outcomes = download_all(client, cfg, mirrors, vec![target], policy, cancel.clone()).await;

    if let Err(e) = batch_error(&mut outcomes) {
        return if e.is_missing_file() {
            Err(Error::GpgNotVerified("repomd.xml (no signature found)".to_string()))
        } else {
            Err(e)
        };
    }

    verifier.verify(manifest, &signature_dest)
}

/// Allow-list then deny-list filter over manifest record names.
fn record_wanted(handle: &Handle, name: &str) -> bool {
    if !handle.download_list.is_empty() && !handle.download_list.iter().any(|n| n == name) {
        return false;
    }
    !handle.download_blacklist.iter().any(|n| n == name)
}

/// Checksum expectation for a record, if checking is on and the type is
/// one we can compute.
fn record_checksum(record: &crate::repomd::RepomdRecord, checksum_check: bool) -> Option<Checksum> {
    if !checksum_check {
        return None;
    }
    let (kind, hex) = record.checksum.as_ref()?;
    match kind.parse::<ChecksumKind>() {
        Ok(kind) => Some(Checksum::new(kind, hex.clone())),
        Err(_) => {
            tracing::warn!(record = %record.name, kind = %kind, "skipping unknown checksum type");
            None
        }
    }
}

/// Update mode: a file from the previous result (or already at the
/// destination) is kept when its checksum still matches.
async fn reusable_path(
    prior: &RepoResult,
    name: &str,
    dest: &Path,
    expected: Option<&Checksum>,
) -> Option<PathBuf> {
    let expected = expected?;
    let candidate = prior.paths.get(name).cloned().unwrap_or_else(|| dest.to_path_buf());
    match checksum::verify(&candidate, expected).await {
        Ok(()) => Some(candidate),
        Err(_) => None,
    }
}

fn with_handle_callbacks(handle: &Handle, mut target: Target) -> Target {
    if let Some(progress) = &handle.progress_cb {
        target = target.with_progress(progress.clone());
    }
    target
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent.display().to_string(), e))?;
    }
    Ok(())
}
