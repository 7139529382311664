//! Scheduler/process stressor: fork a child that does nothing but exit
//! immediately, and reap it. One bogo-op per fork/wait cycle, matching
//! stress-ng's `stress_fork`.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use super::{Args, RunResult};

pub fn run(args: &mut Args) -> RunResult {
    while args.should_continue() {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, 0)) => {
                    args.bump(1);
                    args.mark_counter_ready();
                }
                Ok(_) => {
                    args.mark_run_ok(false);
                    return RunResult::Failure;
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => return RunResult::Failure,
            },
            Ok(ForkResult::Child) => {
                // SAFETY: the child's only job is to exit; no further libc
                // or libstd calls that could deadlock on an inherited lock.
                unsafe { libc::_exit(0) };
            }
            Err(nix::errno::Errno::EAGAIN) => {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            Err(_) => return RunResult::NoResource,
        }
    }
    args.mark_run_ok(true);
    RunResult::Success
}
