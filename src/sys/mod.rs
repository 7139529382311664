//! Thin wrappers around the handful of raw syscalls `nix` does not expose
//! with the exact shape the orchestrator needs: anonymous shared mappings,
//! guard-page re-protection, and the async-signal-safe fatal write path.
//!
//! Every function here does the unsafe call and converts `-1`/null into
//! `std::io::Error::last_os_error()`; callers get a normal `Result`.

use std::io::{Error, Result};
use std::ptr::{null_mut, NonNull};

/// Create a `MAP_SHARED | MAP_ANONYMOUS` mapping of `len` bytes.
///
/// The mapping is zero-filled by the kernel and is inherited across `fork`,
/// which is the entire point: this is how the arena, not any single file,
/// becomes the thing workers and the orchestrator share.
pub fn mmap_anon_shared(len: usize) -> Result<NonNull<u8>> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_SHARED | libc::MAP_ANONYMOUS;
    let ptr = unsafe { libc::mmap(null_mut(), len, prot, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    // mmap never returns null on success.
    Ok(unsafe { NonNull::new_unchecked(ptr as *mut u8) })
}

/// Re-protect `len` bytes starting at `ptr` to `prot` (one of the `libc::PROT_*` bits).
///
/// # Safety
/// `ptr..ptr+len` must be a live, page-aligned mapping owned by the caller.
pub unsafe fn mprotect(ptr: NonNull<u8>, len: usize, prot: i32) -> Result<()> {
    let ret = libc::mprotect(ptr.as_ptr() as *mut _, len, prot);
    if ret == -1 {
        Err(Error::last_os_error())
    } else {
        Ok(())
    }
}

/// # Safety
/// `ptr..ptr+len` must have been obtained from [`mmap_anon_shared`] and not
/// yet unmapped.
pub unsafe fn munmap(ptr: NonNull<u8>, len: usize) -> Result<()> {
    let ret = libc::munmap(ptr.as_ptr() as *mut _, len);
    if ret == -1 {
        Err(Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Round `len` up to the next multiple of the system page size.
pub fn page_round_up(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) & !(page - 1)
}

pub fn page_size() -> usize {
    // SAFETY: sysconf with a valid name never fails in a way that matters here.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Write a fixed, preformatted diagnostic directly to fd 2.
///
/// Called only from the fatal-signal handler (`SIGSEGV`/`SIGILL`/…), which
/// must not allocate, lock, or call anything in libstd's formatting machinery.
/// The caller is responsible for keeping `msg` short-lived and already
/// formatted; this function does nothing but call `write(2)` in a loop.
pub fn write_fd2_sync(msg: &[u8]) {
    let mut off = 0usize;
    while off < msg.len() {
        let ptr = unsafe { msg.as_ptr().add(off) as *const libc::c_void };
        let n = unsafe { libc::write(2, ptr, msg.len() - off) };
        if n <= 0 {
            break;
        }
        off += n as usize;
    }
}
