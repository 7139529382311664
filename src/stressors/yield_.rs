//! Scheduler stressor: hammer `sched_yield(2)`, matching stress-ng's
//! `stress_yield`. One bogo-op per yield call.

use nix::sched::sched_yield;

use super::{Args, RunResult};

pub fn run(args: &mut Args) -> RunResult {
    while args.should_continue() {
        if sched_yield().is_err() {
            return RunResult::Failure;
        }
        args.bump(1);
        args.mark_counter_ready();
    }
    args.mark_run_ok(true);
    RunResult::Success
}
