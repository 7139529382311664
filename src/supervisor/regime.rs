//! The three top-level run regimes: sequential, all-at-once, and permutation.
//!
//! Each driver reduces to one or more calls into [`super::run_parallel`] over
//! a chosen subset of active instance indices; what differs is only which
//! subsets, in what order, and how their [`RunResult`]s combine.

use std::time::Instant;

use arrayvec::ArrayVec;
use tracing::info;

use crate::arena::SharedArena;
use crate::config::{Config, Regime};
use crate::metrics::RunOutcome;
use crate::selection::Instance;

use super::{run_parallel, RunResult};

/// Drive `instances` through whichever regime `config.regime` selects
/// (defaulting to all-at-once if none was given — the same default the
/// selection step already assumed when resolving instance counts).
pub fn run(
    config: &Config,
    instances: &mut [Instance],
    arena: &SharedArena,
    slot_ranges: &[(usize, usize)],
) -> crate::error::Result<RunResult> {
    match config.regime {
        Some(Regime::Sequential(_)) => run_sequential(config, instances, arena, slot_ranges),
        Some(Regime::Permute(_)) => run_permute(config, instances, arena, slot_ranges),
        Some(Regime::All(_)) | None => run_all(config, instances, arena, slot_ranges),
    }
}

fn active_indices(instances: &[Instance]) -> Vec<usize> {
    instances
        .iter()
        .enumerate()
        .filter(|(_, i)| i.is_active())
        .map(|(idx, _)| idx)
        .collect()
}

/// `--all`/`--parallel`: every active instance, all at once.
fn run_all(
    config: &Config,
    instances: &mut [Instance],
    arena: &SharedArena,
    slot_ranges: &[(usize, usize)],
) -> crate::error::Result<RunResult> {
    let order = active_indices(instances);
    run_parallel(config, instances, arena, slot_ranges, &order)
}

/// `--sequential`: one stressor at a time, in registry order, each run to
/// completion before the next is launched.
fn run_sequential(
    config: &Config,
    instances: &mut [Instance],
    arena: &SharedArena,
    slot_ranges: &[(usize, usize)],
) -> crate::error::Result<RunResult> {
    let start = Instant::now();
    let mut outcome = RunOutcome::new();

    for idx in active_indices(instances) {
        if !crate::signal::should_continue() && config.abort {
            break;
        }
        let step = run_parallel(config, instances, arena, slot_ranges, &[idx])?;
        outcome.success &= step.outcome.success;
        outcome.resource_success &= step.outcome.resource_success;
        outcome.metrics_success &= step.outcome.metrics_success;
        outcome.any_failed |= step.outcome.any_failed;
    }

    Ok(RunResult {
        duration: start.elapsed(),
        outcome,
    })
}

/// `--permute`: every non-empty subset of the first `min(active, 16)`
/// stressors, each subset run in parallel. The cap at 16 keeps the
/// subset count (`2^n - 1`) bounded; stressors beyond the 16th are left
/// out of the permutation pool entirely.
fn run_permute(
    config: &Config,
    instances: &mut [Instance],
    arena: &SharedArena,
    slot_ranges: &[(usize, usize)],
) -> crate::error::Result<RunResult> {
    let start = Instant::now();
    let mut outcome = RunOutcome::new();

    let active = active_indices(instances);
    let pool: ArrayVec<usize, 16> = active.iter().take(16).copied().collect();

    if pool.is_empty() {
        return Ok(RunResult {
            duration: start.elapsed(),
            outcome,
        });
    }

    let total_subsets = (1u32 << pool.len()) - 1;
    for mask in 1..=total_subsets {
        if !crate::signal::should_continue() && config.abort {
            break;
        }
        let subset: ArrayVec<usize, 16> = pool
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .map(|(_, &idx)| idx)
            .collect();

        let percent = 100.0 * mask as f64 / total_subsets as f64;
        info!("permute: {percent:.2}% complete");

        let step = run_parallel(config, instances, arena, slot_ranges, &subset)?;
        outcome.success &= step.outcome.success;
        outcome.resource_success &= step.outcome.resource_success;
        outcome.metrics_success &= step.outcome.metrics_success;
        outcome.any_failed |= step.outcome.any_failed;
    }

    Ok(RunResult {
        duration: start.elapsed(),
        outcome,
    })
}
