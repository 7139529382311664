//! Stand-in for a stressor real stress-ng would tag `CLASS_PATHOLOGICAL`
//! (memory hogs that can trigger an OOM-kill storm, stressors that can wedge
//! a VM, etc). The body here is deliberately harmless — the point of this
//! module is to exercise the `--pathological` opt-in gate in [`crate::selection`],
//! not to actually be dangerous.

use super::{Args, RunResult};

pub fn run(args: &mut Args) -> RunResult {
    while args.should_continue() {
        args.bump(1);
        args.mark_counter_ready();
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    args.mark_run_ok(true);
    RunResult::Success
}
