//! The stressor contract.
//!
//! A stressor is a plain function: `run_fn(&mut Args) -> RunResult`. It owns
//! nothing but its own stack and the [`Args`] handle it's given — no access
//! to the registry, the supervisor, or any other instance's state. Everything
//! it needs to report work done or stop running flows through `Args`.
//!
//! The bodies in the submodules here are real (they actually exercise the
//! subsystem their name promises) but deliberately small — the
//! orchestrator's job is to invoke them correctly, not to contain an
//! exhaustive workload library.

pub mod cpu;
pub mod fork;
pub mod hdd;
pub mod matrix;
pub mod noop;
pub mod pathological;
pub mod pipe;
pub mod vm;
pub mod yield_;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::arena::{GuardPages, Metric};

/// What a stressor's `run_fn` reports back, prior to any supervisor-side
/// promotion (e.g. to `MetricsUntrustworthy`) or signal-death override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Failure,
    /// The host lacks a resource the stressor needs (scratch disk space,
    /// a device node, a syscall that returned `ENOSYS`-adjacent errors).
    NoResource,
    /// The stressor doesn't support this host/kernel/arch at all.
    NotImplemented,
}

pub type RunFn = fn(&mut Args) -> RunResult;

/// Everything a stressor body needs, handed in by the supervisor's child
/// path immediately before calling `run_fn`.
pub struct Args<'a> {
    pub name: &'static str,
    pub instance: u32,
    pub num_instances: u32,
    pub pid: i32,
    pub page_size: usize,
    /// Target bogo-ops count; 0 means unbounded (run until the deadline).
    pub max_ops: u64,
    pub deadline: Instant,
    pub guard_pages: GuardPages,

    counter: &'a AtomicU64,
    counter_ready: &'a AtomicBool,
    run_ok: &'a AtomicBool,
    metrics: &'a mut [Metric],
}

impl<'a> Args<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        instance: u32,
        num_instances: u32,
        pid: i32,
        page_size: usize,
        max_ops: u64,
        deadline: Instant,
        guard_pages: GuardPages,
        counter: &'a AtomicU64,
        counter_ready: &'a AtomicBool,
        run_ok: &'a AtomicBool,
        metrics: &'a mut [Metric],
    ) -> Self {
        Args {
            name,
            instance,
            num_instances,
            pid,
            page_size,
            max_ops,
            deadline,
            guard_pages,
            counter,
            counter_ready,
            run_ok,
            metrics,
        }
    }

    /// Add `n` to the bogo-ops counter and return the new total.
    pub fn bump(&self, n: u64) -> u64 {
        self.counter.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Whether `max_ops` (if nonzero) has been reached.
    pub fn target_reached(&self) -> bool {
        self.max_ops != 0 && self.counter() >= self.max_ops
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The condition every stressor's main loop should poll: keep going
    /// while this is true. Cancellation is cooperative (§5): besides the
    /// stressor's own target/deadline, this also reads the process-wide
    /// continue flag a worker's `child_alarm_handler` clears on SIGALRM, so
    /// a SIGINT/SIGHUP-driven shutdown actually stops the loop instead of
    /// relying on escalation to SIGKILL.
    pub fn should_continue(&self) -> bool {
        !self.target_reached() && !self.deadline_passed() && crate::signal::should_continue()
    }

    /// Mark the counter as having been updated at least once in a way the
    /// orchestrator can trust (set once the first checkpoint is reached,
    /// not necessarily once per iteration).
    pub fn mark_counter_ready(&self) {
        self.counter_ready.store(true, Ordering::Relaxed);
    }

    pub fn mark_run_ok(&self, ok: bool) {
        self.run_ok.store(ok, Ordering::Relaxed);
    }

    /// Record an auxiliary (non-bogo-ops) metric at a fixed slot index.
    /// `idx` must be stable across instances of the same stressor: the
    /// supervisor's geometric-mean aggregation keys on slot index, not on
    /// `description` text.
    pub fn set_metric(&mut self, idx: usize, description: &'static str, value: f64) {
        if let Some(slot) = self.metrics.get_mut(idx) {
            slot.description = Some(description);
            slot.value = value;
        }
    }

    /// Guard page addresses as raw pointers, for stressors that probe
    /// known-invalid memory deliberately.
    pub fn guard_none(&self) -> NonNull<u8> {
        self.guard_pages.none
    }

    pub fn guard_ro(&self) -> NonNull<u8> {
        self.guard_pages.ro
    }
}
