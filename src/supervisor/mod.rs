//! Forks, supervises, and reaps the worker process tree.
//!
//! This is the orchestrator's busiest module: it drives the three regimes
//! over [`crate::selection::Instance`], forks one child per live instance,
//! installs that child's signal handlers and resource limits, invokes the
//! stressor's `run_fn`, and reaps the result into the shared arena and the
//! instance's `status_counters`.

pub mod regime;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::arena::SharedArena;
use crate::config::Config;
use crate::metrics::{self, RunOutcome};
use crate::registry::munge;
use crate::report::ExitCode;
use crate::selection::Instance;
use crate::stressors::Args;

/// Result of supervising one full run (one regime pass, or one permutation
/// round): elapsed wall time and the accumulated success flags.
#[derive(Clone, Copy, Debug)]
pub struct RunResult {
    pub duration: Duration,
    pub outcome: RunOutcome,
}

fn timeval_to_secs(tv: nix::sys::time::TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
}

/// Terminates the child process if it unwinds out of [`run_child`] without
/// reaching its own explicit `_exit` — an `atexit`-hook equivalent that
/// catches a stressor body returning through a path that bypasses the
/// intended exit, and reports it as [`ExitCode::BySysExit`].
struct SysExitGuard;

impl Drop for SysExitGuard {
    fn drop(&mut self) {
        unsafe { libc::_exit(ExitCode::BySysExit as i32) };
    }
}

/// Fork and run one instance of `instances[inst_idx]`'s stressor at arena
/// slot `slot_idx`, reporting itself to the stressor body as replica
/// `replica_idx` of that stressor's own population. Returns the child's
/// pid to the parent.
fn launch_instance(
    instances: &[Instance],
    inst_idx: usize,
    slot_idx: usize,
    replica_idx: usize,
    arena: &SharedArena,
    deadline: Instant,
    started_count: u32,
) -> crate::error::Result<Pid> {
    let mut retries = 0u32;
    loop {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                crate::signal::register_child(child.as_raw());
                return Ok(child);
            }
            Ok(ForkResult::Child) => {
                run_child(instances, inst_idx, slot_idx, replica_idx, arena, deadline, started_count);
                unreachable!("run_child always terminates the process");
            }
            Err(Errno::EAGAIN) => {
                retries += 1;
                if retries > 50 {
                    return Err(crate::error::Error::ForkFailed(
                        retries,
                        std::io::Error::from_raw_os_error(Errno::EAGAIN as i32),
                    ));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return Err(crate::error::Error::ForkFailed(
                    retries,
                    std::io::Error::from_raw_os_error(e as i32),
                ));
            }
        }
    }
}

/// The child process's entire lifetime, from just after `fork` to its
/// final `_exit`. Never returns.
fn run_child(
    instances: &[Instance],
    inst_idx: usize,
    slot_idx: usize,
    replica_idx: usize,
    arena: &SharedArena,
    deadline: Instant,
    started_count: u32,
) -> ! {
    let guard = SysExitGuard;

    let pid = std::process::id() as i32;
    let inst = &instances[inst_idx];

    // SAFETY: single-threaded child, before any other setup touches signals.
    if unsafe { crate::signal::install_child_handlers() }.is_err() {
        warn!(stressor = munge(inst.stressor.name), "failed to install child signal handlers");
    }
    unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };

    // Stagger startup so a large `--all N` fork burst doesn't thunder-herd
    // the scheduler and the shared-arena cache lines all at once.
    let stagger_us = 1000u64.saturating_mul(started_count as u64);
    std::thread::sleep(Duration::from_micros(stagger_us.min(200_000)));

    // SAFETY: this child owns slot `slot_idx` exclusively until it exits.
    let stats = unsafe { arena.stats_mut(slot_idx) };
    let checksum = unsafe { arena.checksum_mut(slot_idx) };

    stats.pid.store(pid, Ordering::Relaxed);
    checksum.data = crate::arena::ChecksumData::new(0, false);
    let start = Instant::now();
    stats.start = start.elapsed().as_secs_f64();

    let mut run_args = Args::new(
        inst.stressor.name,
        replica_idx as u32,
        inst.num_instances,
        pid,
        crate::sys::page_size(),
        inst.bogo_ops_target,
        deadline,
        arena.guard_pages(),
        &stats.counter_info.counter,
        &stats.counter_info.counter_ready,
        &stats.counter_info.run_ok,
        &mut stats.metrics,
    );

    let result = (inst.stressor.run_fn)(&mut run_args);

    let duration = start.elapsed();
    stats.duration = duration.as_secs_f64();
    stats.duration_total = stats.duration;
    stats.counter_total = stats.counter_info.counter.load(Ordering::Relaxed);

    if let Ok(usage) = getrusage(UsageWho::RUSAGE_SELF) {
        stats.rusage_utime = timeval_to_secs(usage.user_time());
        stats.rusage_stime = timeval_to_secs(usage.system_time());
        stats.rusage_utime_total = stats.rusage_utime;
        stats.rusage_stime_total = stats.rusage_stime;
        stats.rusage_maxrss = usage.max_rss();
    }
    stats.completed = true;

    checksum.data = crate::arena::ChecksumData::new(
        stats.counter_info.counter.load(Ordering::Relaxed),
        stats.counter_info.run_ok.load(Ordering::Relaxed),
    );
    checksum.seal();

    let counter_ready = stats.counter_info.counter_ready.load(Ordering::Relaxed);
    let force_killed = stats.counter_info.force_killed.load(Ordering::Relaxed);

    let mut exit_code = match result {
        crate::stressors::RunResult::Success => ExitCode::Success,
        crate::stressors::RunResult::Failure => ExitCode::Failure,
        crate::stressors::RunResult::NoResource => ExitCode::NoResource,
        crate::stressors::RunResult::NotImplemented => ExitCode::NotImplemented,
    };

    if !counter_ready && !force_killed {
        exit_code = ExitCode::MetricsUntrustworthy;
    }

    if exit_code == ExitCode::Success
        && duration < deadline.saturating_duration_since(start)
        && inst.bogo_ops_target != 0
        && stats.counter_total < inst.bogo_ops_target
    {
        debug!(
            stressor = munge(inst.stressor.name),
            "completed before deadline without reaching its bogo-ops target"
        );
    }

    std::mem::forget(guard);
    unsafe { libc::_exit(exit_code as i32) };
}

/// Reap every pid in `pending` (blocking, unless `--aggressive` is set, in
/// which case periodically re-pin live workers to a random CPU from the
/// parent's own affinity mask while waiting).
fn wait_all(
    pending: &mut Vec<(Pid, usize, usize)>,
    instances: &mut [Instance],
    arena: &SharedArena,
    aggressive: bool,
    seed: Option<u64>,
) -> RunOutcome {
    let mut outcome = RunOutcome::new();
    let ticks_per_sec: i64 = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    let dither_period = if ticks_per_sec > 0 {
        Duration::from_micros(1_000_000 / (5 * ticks_per_sec.max(1)) as u64)
    } else {
        Duration::from_millis(4)
    };
    let mut dither_rng = aggressive.then(|| crate::config::seeded_rng(seed));

    while !pending.is_empty() {
        if let Some(rng) = dither_rng.as_mut() {
            dither_affinity(pending, rng);
            std::thread::sleep(dither_period);
        }

        let flag = if aggressive { WaitPidFlag::WNOHANG } else { WaitPidFlag::empty() };
        match waitpid(Pid::from_raw(-1), Some(flag)) {
            Ok(WaitStatus::StillAlive) => continue,
            Ok(status) => {
                if let Some(pid) = status_pid(&status) {
                    if let Some(pos) = pending.iter().position(|(p, _, _)| *p == pid) {
                        let (_, inst_idx, slot_idx) = pending.remove(pos);
                        crate::signal::deregister_child(pid.as_raw());
                        arena.stats(slot_idx).pid.store(0, Ordering::Relaxed);
                        let classification = classify(&status, arena, slot_idx);
                        log_reap(&instances[inst_idx], pid, &status);
                        instances[inst_idx].status_counters[classification.bucket as usize] += 1;
                        outcome.absorb(&classification);
                        if classification.requests_abort {
                            crate::signal::request_stop();
                        }
                    }
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                for (pid, _, slot_idx) in pending.drain(..) {
                    crate::signal::deregister_child(pid.as_raw());
                    arena.stats(slot_idx).pid.store(0, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    outcome
}

fn status_pid(status: &WaitStatus) -> Option<Pid> {
    match *status {
        WaitStatus::Exited(pid, _)
        | WaitStatus::Signaled(pid, _, _)
        | WaitStatus::Stopped(pid, _)
        | WaitStatus::Continued(pid) => Some(pid),
        _ => None,
    }
}

fn log_reap(inst: &Instance, pid: Pid, status: &WaitStatus) {
    match *status {
        WaitStatus::Exited(_, code) => {
            debug!(stressor = munge(inst.stressor.name), pid = pid.as_raw(), code, "reaped");
        }
        WaitStatus::Signaled(_, sig, _) => {
            info!(stressor = munge(inst.stressor.name), pid = pid.as_raw(), signal = %sig, "reaped by signal");
        }
        _ => {}
    }
}

fn classify(status: &WaitStatus, _arena: &SharedArena, _slot_idx: usize) -> metrics::Classification {
    match *status {
        WaitStatus::Exited(_, code) => {
            let exit_code = ExitCode::from_raw(code).unwrap_or(ExitCode::Failure);
            metrics::classify_exit(Some(exit_code), false, false)
        }
        WaitStatus::Signaled(_, sig, _) => {
            let died_by_sigalrm = sig == Signal::SIGALRM;
            let possibly_oom_killed = sig == Signal::SIGKILL;
            metrics::classify_exit(None, died_by_sigalrm, possibly_oom_killed)
        }
        _ => metrics::classify_exit(Some(ExitCode::Failure), false, false),
    }
}

/// Re-pin every live pid in `pending` to a uniformly random CPU drawn from
/// the parent's own affinity mask.
fn dither_affinity(pending: &[(Pid, usize, usize)], rng: &mut rand::rngs::StdRng) {
    use rand::Rng;

    let Ok(mask) = nix::sched::sched_getaffinity(Pid::from_raw(0)) else {
        return;
    };
    let online: Vec<usize> = (0..libc::CPU_SETSIZE as usize).filter(|&c| mask.is_set(c).unwrap_or(false)).collect();
    if online.is_empty() {
        return;
    }
    for (pid, _, _) in pending {
        let cpu = online[rng.gen_range(0..online.len())];
        let mut single = nix::sched::CpuSet::new();
        if single.set(cpu).is_ok() {
            let _ = nix::sched::sched_setaffinity(*pid, &single);
        }
    }
}

/// Fork and supervise exactly the instances in `launch_order` (a subset of
/// `instances`, already filtered by the caller for a permutation round or a
/// sequential single-stressor pass), all in parallel.
pub fn run_parallel(
    config: &Config,
    instances: &mut [Instance],
    arena: &SharedArena,
    slot_ranges: &[(usize, usize)],
    launch_order: &[usize],
) -> crate::error::Result<RunResult> {
    let start = Instant::now();
    let deadline = config
        .timeout
        .map(|t| start + t)
        .unwrap_or_else(|| start + Duration::from_secs(u64::MAX / 2));

    let mut pending = Vec::new();
    let mut started_count = 0u32;

    'launch: for &inst_idx in launch_order {
        let inst = &instances[inst_idx];
        if !inst.is_active() {
            continue;
        }
        let (range_start, range_end) = slot_ranges[inst_idx];
        for slot_idx in range_start..range_end {
            if !crate::signal::should_continue() {
                if config.abort {
                    break 'launch;
                }
            }
            let replica_idx = slot_idx - range_start;
            let pid = launch_instance(instances, inst_idx, slot_idx, replica_idx, arena, deadline, started_count)?;
            started_count += 1;
            pending.push((pid, inst_idx, slot_idx));
        }
    }

    let outcome = wait_all(&mut pending, instances, arena, config.aggressive, config.seed);

    Ok(RunResult {
        duration: start.elapsed(),
        outcome,
    })
}
