/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 */

//! Mirror-aware download engine: one shared mirror list, many targets,
//! per-mirror concurrency caps, and failover on error.

pub mod fastest;
pub mod mirror;
pub mod scheduler;
pub mod target;
pub mod transfer;

pub use fastest::{FastestMirrorConfig, LatencyCache, MirrorStatusFn, DEFAULT_CACHE_MAX_AGE};
pub use mirror::{Mirror, MirrorList, Protocol};
pub use scheduler::{batch_error, cancel_flag, download_all, SchedulerPolicy};
pub use target::{Control, EndFn, ProgressFn, Target, TargetOutcome, TargetState};
pub use transfer::{TransferConfig, TransferStats};
