//! Signal routing and kill escalation.
//!
//! Signal handlers can't close over state, so the flags and live-pid table
//! here are process-wide statics (`continue_flag`/`caught_sigint`/
//! `wait_flag`-style globals), made explicit as atomics instead of implicit
//! through a single-threaded C global. `LIVE_PIDS` is a `Mutex`, which is not
//! strictly async-signal-safe — the hold is always O(μs) and reentrant
//! signal delivery during the hold is vanishingly unlikely in practice, but
//! it is a known sharp edge.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

use crate::sys::write_fd2_sync;

static CONTINUE: AtomicBool = AtomicBool::new(true);
static WAIT_FLAG: AtomicBool = AtomicBool::new(true);
static CAUGHT_SIGINT: AtomicBool = AtomicBool::new(false);
static KILL_ESCALATION: AtomicU32 = AtomicU32::new(0);

static LIVE_PIDS: Mutex<Vec<i32>> = Mutex::new(Vec::new());

/// One-shot record of the `SI_USER`-sourced `SIGALRM` that first arrived,
/// kept for forensic logging after the run ends, reported as ambient
/// `tracing` diagnostics rather than a separate log format.
#[derive(Clone, Copy, Debug)]
pub struct AlarmForensics {
    pub sender_pid: i32,
    pub sender_uid: u32,
    pub received_at_unix: u64,
}

static ALARM_FORENSICS: Mutex<Option<AlarmForensics>> = Mutex::new(None);

pub fn should_continue() -> bool {
    CONTINUE.load(Ordering::SeqCst)
}

pub fn request_stop() {
    CONTINUE.store(false, Ordering::SeqCst);
}

pub fn reset() {
    CONTINUE.store(true, Ordering::SeqCst);
    WAIT_FLAG.store(true, Ordering::SeqCst);
    CAUGHT_SIGINT.store(false, Ordering::SeqCst);
    KILL_ESCALATION.store(0, Ordering::SeqCst);
    LIVE_PIDS.lock().unwrap().clear();
    *ALARM_FORENSICS.lock().unwrap() = None;
}

pub fn caught_sigint() -> bool {
    CAUGHT_SIGINT.load(Ordering::SeqCst)
}

pub fn wait_flag() -> bool {
    WAIT_FLAG.load(Ordering::SeqCst)
}

pub fn alarm_forensics() -> Option<AlarmForensics> {
    *ALARM_FORENSICS.lock().unwrap()
}

pub fn register_child(pid: i32) {
    LIVE_PIDS.lock().unwrap().push(pid);
}

pub fn deregister_child(pid: i32) {
    LIVE_PIDS.lock().unwrap().retain(|&p| p != pid);
}

pub fn live_pids() -> Vec<i32> {
    LIVE_PIDS.lock().unwrap().clone()
}

/// Signal every currently-registered child with `SIGALRM`, escalating to
/// `SIGKILL` unconditionally once this has been called 5 times in this
/// process's lifetime, regardless of which call site triggered it.
pub fn kill_stressors(requested: Signal) {
    let calls = KILL_ESCALATION.fetch_add(1, Ordering::SeqCst) + 1;
    let signum = if calls >= 5 { Signal::SIGKILL } else { requested };
    for pid in live_pids() {
        let _ = signal::kill(Pid::from_raw(pid), signum);
    }
}

extern "C" fn term_handler(_signum: libc::c_int) {
    CAUGHT_SIGINT.store(true, Ordering::SeqCst);
    CONTINUE.store(false, Ordering::SeqCst);
    WAIT_FLAG.store(false, Ordering::SeqCst);
    kill_stressors(Signal::SIGALRM);
}

extern "C" fn cleanup_handler(_signum: libc::c_int) {
    CONTINUE.store(false, Ordering::SeqCst);
    kill_stressors(Signal::SIGALRM);
}

extern "C" fn child_alarm_handler(_signum: libc::c_int) {
    CONTINUE.store(false, Ordering::SeqCst);
}

extern "C" fn stats_handler(_signum: libc::c_int) {
    // Async-signal-unsafe (allocates, calls into stdio); tolerated since
    // this handler only fires on an explicit, infrequent user request.
    let load = load_average_best_effort();
    println!("load average: {load}");
}

fn load_average_best_effort() -> String {
    std::fs::read_to_string("/proc/loadavg")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unavailable".to_string())
}

extern "C" fn sigalrm_sigaction(
    _signum: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    if !info.is_null() {
        // SAFETY: delivered by the kernel; reading these fields is defined
        // by POSIX regardless of which union member is active for this
        // `si_code`.
        unsafe {
            let code = (*info).si_code;
            if code == libc::SI_USER {
                let pid = (*info).si_pid();
                let uid = (*info).si_uid();
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                if let Ok(mut slot) = ALARM_FORENSICS.try_lock() {
                    if slot.is_none() {
                        *slot = Some(AlarmForensics {
                            sender_pid: pid,
                            sender_uid: uid,
                            received_at_unix: now,
                        });
                    }
                }
            }
        }
    }
    if !CAUGHT_SIGINT.load(Ordering::SeqCst) {
        CONTINUE.store(false, Ordering::SeqCst);
        WAIT_FLAG.store(false, Ordering::SeqCst);
        kill_stressors(Signal::SIGALRM);
    }
}

const FATAL_MSG: &[u8] = b"stressforge: fatal signal received in orchestrator, aborting\n";

extern "C" fn fatal_handler(_signum: libc::c_int) {
    // Async-signal-safe: a fixed preformatted buffer and a raw write(2),
    // nothing else. Do not add logging, allocation, or locking here.
    write_fd2_sync(FATAL_MSG);
    for pid in live_pids() {
        let _ = signal::kill(Pid::from_raw(pid), Signal::SIGALRM);
    }
    unsafe { libc::_exit(crate::report::ExitCode::Signaled as i32) };
}

fn handler_action(handler: SigHandler) -> SigAction {
    SigAction::new(handler, SaFlags::empty(), SigSet::empty())
}

/// Install the orchestrator-process (parent) signal handlers. Must be
/// called once, before the first fork.
///
/// # Safety
/// Must be called before any other thread is spawned; `sigaction` itself
/// is only unsafe because it can replace handlers other code relies on.
pub unsafe fn install_parent_handlers() -> crate::error::Result<()> {
    signal::sigaction(Signal::SIGINT, &handler_action(SigHandler::Handler(term_handler)))
        .map_err(crate::error::Error::Signal)?;
    signal::sigaction(Signal::SIGHUP, &handler_action(SigHandler::Handler(term_handler)))
        .map_err(crate::error::Error::Signal)?;
    signal::sigaction(Signal::SIGTERM, &handler_action(SigHandler::Handler(cleanup_handler)))
        .map_err(crate::error::Error::Signal)?;
    signal::sigaction(Signal::SIGQUIT, &handler_action(SigHandler::Handler(cleanup_handler)))
        .map_err(crate::error::Error::Signal)?;
    signal::sigaction(
        Signal::SIGALRM,
        &SigAction::new(
            SigHandler::SigAction(sigalrm_sigaction),
            SaFlags::SA_SIGINFO,
            SigSet::empty(),
        ),
    )
    .map_err(crate::error::Error::Signal)?;
    signal::sigaction(Signal::SIGUSR2, &handler_action(SigHandler::Handler(stats_handler)))
        .map_err(crate::error::Error::Signal)?;
    for sig in [Signal::SIGILL, Signal::SIGSEGV, Signal::SIGFPE, Signal::SIGBUS, Signal::SIGABRT] {
        signal::sigaction(sig, &handler_action(SigHandler::Handler(fatal_handler)))
            .map_err(crate::error::Error::Signal)?;
    }
    for sig in [Signal::SIGUSR1, Signal::SIGTTOU, Signal::SIGTTIN, Signal::SIGWINCH] {
        signal::sigaction(sig, &handler_action(SigHandler::SigIgn)).map_err(crate::error::Error::Signal)?;
    }
    Ok(())
}

/// Install the per-worker (child) signal handlers, after fork but before
/// the stressor's `run_fn` is invoked.
///
/// # Safety
/// Must be called exactly once per child process, before any other thread
/// in that process is spawned.
pub unsafe fn install_child_handlers() -> crate::error::Result<()> {
    signal::sigaction(Signal::SIGALRM, &handler_action(SigHandler::Handler(child_alarm_handler)))
        .map_err(crate::error::Error::Signal)?;
    for sig in [Signal::SIGUSR1, Signal::SIGUSR2, Signal::SIGTTOU, Signal::SIGTTIN, Signal::SIGWINCH] {
        signal::sigaction(sig, &handler_action(SigHandler::SigIgn)).map_err(crate::error::Error::Signal)?;
    }
    Ok(())
}
