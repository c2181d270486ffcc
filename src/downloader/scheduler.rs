/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 */

//! Scheduler for parallel downloads across a shared mirror list.
//!
//! Targets compete for mirrors under two caps: a global in-flight limit
//! and a per-mirror limit. Each target tries every mirror at most once,
//! in (preference, fewest failures, insertion order) order, until it
//! succeeds, runs out of mirrors, or hits the per-target try limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinSet;

use crate::checksum::{self, Checksum};
use crate::error::{Error, Result};

use super::mirror::MirrorList;
use super::target::{Target, TargetOutcome, TargetState};
use super::transfer::{self, TransferConfig, TransferRequest, TransferStats};

/// Batch-level scheduling limits.
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    /// Global in-flight cap, 1..=20.
    pub max_parallel: usize,
    /// In-flight cap per mirror, at least 1.
    pub max_per_mirror: usize,
    /// Mirrors tried per target before giving up; 0 means try them all.
    pub max_mirror_tries: usize,
    /// Cancel the whole batch on the first failed target.
    pub failfast: bool,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_per_mirror: 2,
            max_mirror_tries: 0,
            failfast: false,
        }
    }
}

enum SlotPhase {
    Pending,
    InFlight,
    Done,
}

struct Slot {
    target: Target,
    /// Mirror indices already tried; never contains duplicates.
    tried: Vec<usize>,
    tried_override: bool,
    phase: SlotPhase,
    last_error: Option<Error>,
    outcome: Option<TargetOutcome>,
}

enum Election {
    /// Launch on a mirror index, or on the target's own base URL.
    Launch(Option<usize>),
    /// Every untried mirror is at its in-flight cap right now.
    Wait,
    /// No mirror left to try.
    Exhausted,
}

/// Download a batch of targets.
///
/// Always returns one outcome per target, in input order. Mirror failure
/// counters accumulate in `mirrors`; the caller resets them between
/// batches as needed. The `cancel` flag may be set by the caller (signal
/// handler) or internally by progress-callback aborts and failfast.
pub async fn download_all(
    client: &Client,
    cfg: &TransferConfig,
    mirrors: &mut MirrorList,
    targets: Vec<Target>,
    policy: &SchedulerPolicy,
    cancel: Arc<AtomicBool>,
) -> Vec<TargetOutcome> {
    if targets.is_empty() {
        return Vec::new();
    }

    let mut slots: Vec<Slot> = targets
        .into_iter()
        .map(|target| Slot {
            target,
            tried: Vec::new(),
            tried_override: false,
            phase: SlotPhase::Pending,
            last_error: None,
            outcome: None,
        })
        .collect();

    // Resumable targets whose destination already verifies need no
    // transfer at all.
    for slot in &mut slots {
        if slot.target.resume {
            if let Some(expected) = &slot.target.expected_checksum {
                if checksum::verify(&slot.target.dest, expected).await.is_ok() {
                    tracing::debug!(path = %slot.target.dest.display(), "already downloaded");
                    finalize(slot, None, 0, Ok(()));
                }
            }
        }
    }

    let mut inflight = vec![0usize; mirrors.len()];
    let mut join_set: JoinSet<(usize, Option<usize>, String, Result<TransferStats>)> =
        JoinSet::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            // Stop launching; in-flight transfers notice the flag and
            // drain on their own.
            for idx in 0..slots.len() {
                if matches!(slots[idx].phase, SlotPhase::Pending) {
                    finalize(&mut slots[idx], None, 0, Err(Error::Interrupted));
                }
            }
        } else {
            for idx in 0..slots.len() {
                if join_set.len() >= policy.max_parallel {
                    break;
                }
                if !matches!(slots[idx].phase, SlotPhase::Pending) {
                    continue;
                }
                match elect_mirror(&slots[idx], mirrors, &inflight, policy) {
                    Election::Launch(mirror_idx) => {
                        let slot = &mut slots[idx];
                        let url = match mirror_idx {
                            Some(m) => {
                                slot.tried.push(m);
                                inflight[m] += 1;
                                transfer::join_url(
                                    mirrors.nth_url(m).expect("elected mirror exists"),
                                    &slot.target.relative_path,
                                )
                            }
                            None => {
                                slot.tried_override = true;
                                transfer::join_url(
                                    slot.target.base_url.as_deref().expect("override url"),
                                    &slot.target.relative_path,
                                )
                            }
                        };
                        slot.phase = SlotPhase::InFlight;
                        spawn_transfer(&mut join_set, client, cfg, slot, idx, mirror_idx, url, &cancel);
                    }
                    Election::Wait => {}
                    Election::Exhausted => {
                        let slot = &mut slots[idx];
                        let err = slot.last_error.take().unwrap_or_else(|| {
                            Error::BadArgument(format!(
                                "no usable mirror for '{}'",
                                slot.target.relative_path
                            ))
                        });
                        finalize(slot, None, 0, Err(err));
                    }
                }
            }
        }

        if join_set.is_empty() {
            let pending = slots
                .iter()
                .any(|s| matches!(s.phase, SlotPhase::Pending));
            if !pending || cancel.load(Ordering::Relaxed) {
                break;
            }
            // Nothing in flight and nothing launched: every pending
            // target is exhausted next round.
            continue;
        }

        let joined = match join_set.join_next().await {
            Some(res) => res,
            None => break,
        };

        let (idx, mirror_idx, url, result) = match joined {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(error = %e, "download task did not finish");
                continue;
            }
        };

        if let Some(m) = mirror_idx {
            inflight[m] -= 1;
        }

        let slot = &mut slots[idx];
        match result {
            Ok(stats) => {
                tracing::debug!(url = %url, bytes = stats.bytes, "target complete");
                finalize(slot, Some(url), stats.bytes, Ok(()));
            }
            Err(Error::Interrupted) => {
                cancel.store(true, Ordering::Relaxed);
                finalize(slot, Some(url), 0, Err(Error::Interrupted));
            }
            Err(err) => {
                if err.is_mirror_failure() {
                    if let Some(m) = mirror_idx {
                        mirrors.add_failure(m);
                    }
                }
                tracing::debug!(url = %url, error = %err, "transfer failed");
                if policy.failfast {
                    finalize(slot, Some(url), 0, Err(err));
                    cancel.store(true, Ordering::Relaxed);
                } else {
                    // Requeue; the launch phase decides whether any
                    // mirror is left for another attempt.
                    slot.last_error = Some(err);
                    slot.phase = SlotPhase::Pending;
                }
            }
        }
    }

    // A task lost to a panic leaves its slot without a terminal state;
    // close it out so every target still reports exactly once.
    for slot in &mut slots {
        if slot.outcome.is_none() {
            finalize(slot, None, 0, Err(Error::Interrupted));
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.outcome.expect("every slot reached a terminal state"))
        .collect()
}

/// Pick the next mirror for a pending target: highest preference first,
/// then fewest failures, then insertion order.
fn elect_mirror(
    slot: &Slot,
    mirrors: &MirrorList,
    inflight: &[usize],
    policy: &SchedulerPolicy,
) -> Election {
    if slot.target.base_url.is_some() {
        return if slot.tried_override {
            Election::Exhausted
        } else {
            Election::Launch(None)
        };
    }

    if policy.max_mirror_tries > 0 && slot.tried.len() >= policy.max_mirror_tries {
        return Election::Exhausted;
    }

    let mut best: Option<usize> = None;
    let mut any_untried = false;

    for (i, mirror) in mirrors.iter().enumerate() {
        if let Some(subset) = &slot.target.mirror_subset {
            if !subset.contains(&i) {
                continue;
            }
        }
        if slot.tried.contains(&i) {
            continue;
        }
        any_untried = true;
        if inflight[i] >= policy.max_per_mirror {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) => {
                let cur = mirrors.nth(b).expect("candidate exists");
                (mirror.preference, std::cmp::Reverse(mirror.fails))
                    > (cur.preference, std::cmp::Reverse(cur.fails))
            }
        };
        if better {
            best = Some(i);
        }
    }

    match best {
        Some(m) => Election::Launch(Some(m)),
        None if any_untried => Election::Wait,
        None => Election::Exhausted,
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_transfer(
    join_set: &mut JoinSet<(usize, Option<usize>, String, Result<TransferStats>)>,
    client: &Client,
    cfg: &TransferConfig,
    slot: &Slot,
    idx: usize,
    mirror_idx: Option<usize>,
    url: String,
    cancel: &Arc<AtomicBool>,
) {
    let client = client.clone();
    let cfg = cfg.clone();
    let cancel = cancel.clone();
    let dest = slot.target.dest.clone();
    let resume = slot.target.resume;
    let byte_range = slot.target.byte_range;
    let expected_size = slot.target.expected_size;
    let expected_checksum = slot.target.expected_checksum.clone();
    let progress = slot.target.progress.clone();

    join_set.spawn(async move {
        let request = TransferRequest {
            url: url.clone(),
            dest: &dest,
            resume,
            byte_range,
            expected_size,
            progress,
        };

        let result = match transfer::fetch(&client, &cfg, request, &cancel).await {
            Ok(stats) => verify_download(&dest, expected_size, expected_checksum.as_ref(), stats).await,
            Err(e) => Err(e),
        };

        (idx, mirror_idx, url, result)
    });
}

/// Size and checksum gate between "transfer finished" and "target ok".
async fn verify_download(
    dest: &std::path::Path,
    expected_size: Option<u64>,
    expected_checksum: Option<&Checksum>,
    stats: TransferStats,
) -> Result<TransferStats> {
    if let Some(expected) = expected_size {
        let actual = tokio::fs::metadata(dest)
            .await
            .map_err(|e| Error::io(dest.display().to_string(), e))?
            .len();
        if actual != expected {
            discard(dest).await;
            return Err(Error::ChecksumMismatch {
                file: dest.display().to_string(),
                expected: format!("{} bytes", expected),
                actual: format!("{} bytes", actual),
            });
        }
    }

    if let Some(expected) = expected_checksum {
        if let Err(e) = checksum::verify(dest, expected).await {
            if matches!(e, Error::ChecksumMismatch { .. }) {
                discard(dest).await;
            }
            return Err(e);
        }
    }

    Ok(stats)
}

/// Drop a failed verification artifact so the next mirror attempt does
/// not resume from corrupt bytes.
async fn discard(dest: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(dest).await {
        tracing::debug!(path = %dest.display(), error = %e, "could not remove rejected file");
    }
}

fn finalize(slot: &mut Slot, effective_url: Option<String>, transferred: u64, result: Result<()>) {
    let state = match result {
        Ok(()) => TargetState::Ok,
        Err(e) => TargetState::Failed(e),
    };
    let outcome = TargetOutcome {
        relative_path: slot.target.relative_path.clone(),
        dest: slot.target.dest.clone(),
        effective_url,
        transferred,
        state,
    };
    if let Some(end) = &slot.target.end {
        end(&outcome);
    }
    slot.phase = SlotPhase::Done;
    slot.outcome = Some(outcome);
}

/// Surface the batch result the way `perform` reports it: `Ok` when all
/// targets finished, the single error when one failed, a composite when
/// several did. Targets that were merely cancelled while another target
/// failed are collateral and do not hide the real error; a batch where
/// cancellation is the only failure reports `Interrupted`.
pub fn batch_error(outcomes: &mut [TargetOutcome]) -> Result<()> {
    let mut interrupted = false;
    let mut errors: Vec<Error> = Vec::new();

    for outcome in outcomes.iter_mut() {
        if matches!(outcome.state, TargetState::Failed(_)) {
            let state = std::mem::replace(&mut outcome.state, TargetState::Ok);
            if let TargetState::Failed(e) = state {
                if matches!(e, Error::Interrupted) {
                    interrupted = true;
                } else {
                    errors.push(e);
                }
            }
        }
    }

    match errors.len() {
        0 if !interrupted => Ok(()),
        0 => Err(Error::Interrupted),
        1 => Err(errors.pop().expect("one error")),
        n => {
            let first = errors.remove(0);
            Err(Error::Unfinished {
                failed: n,
                first: Box::new(first),
            })
        }
    }
}

/// Cancellation flag shared between the scheduler, transfers, and any
/// signal watcher.
pub fn cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
