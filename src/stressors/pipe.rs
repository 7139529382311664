//! Pipe stressor: write/read a small message through an anonymous pipe in
//! a tight loop within the same process, matching stress-ng's `stress_pipe`
//! minus its cross-process child variant (the fork stressor already covers
//! process-creation overhead).

use std::io::{Read, Write};

use nix::unistd::pipe;

use super::{Args, RunResult};

const MSG: &[u8] = b"stressforge-pipe-ping";

pub fn run(args: &mut Args) -> RunResult {
    let (mut reader, mut writer) = match pipe() {
        Ok((r, w)) => (
            std::fs::File::from(r),
            std::fs::File::from(w),
        ),
        Err(_) => return RunResult::NoResource,
    };

    let mut buf = [0u8; MSG.len()];
    while args.should_continue() {
        if writer.write_all(MSG).is_err() {
            args.mark_run_ok(false);
            return RunResult::Failure;
        }
        if reader.read_exact(&mut buf).is_err() || buf != MSG {
            args.mark_run_ok(false);
            return RunResult::Failure;
        }
        args.bump(1);
        args.mark_counter_ready();
    }
    args.mark_run_ok(true);
    RunResult::Success
}
