//! Does as little as possible while still honoring the contract: bumps the
//! counter once per loop iteration and sleeps briefly. Used by the test
//! suite as a stand-in for "a stressor that always passes instantly".

use std::thread;
use std::time::Duration;

use super::{Args, RunResult};

pub fn run(args: &mut Args) -> RunResult {
    while args.should_continue() {
        args.bump(1);
        args.mark_counter_ready();
        thread::sleep(Duration::from_millis(1));
    }
    args.mark_run_ok(true);
    RunResult::Success
}
