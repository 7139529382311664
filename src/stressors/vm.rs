//! Virtual-memory stressor: map a chunk of anonymous memory, write a
//! pattern across every page, read it back, unmap. One bogo-op per full
//! map/touch/unmap cycle, following stress-ng's `stress_vm` general shape
//! (it has many sub-methods; this implements the plain write-and-verify
//! one).

use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

use super::{Args, RunResult};

const CHUNK_PAGES: usize = 64;

pub fn run(args: &mut Args) -> RunResult {
    let len = args.page_size * CHUNK_PAGES;
    let len_nz = match std::num::NonZeroUsize::new(len) {
        Some(n) => n,
        None => return RunResult::NoResource,
    };

    while args.should_continue() {
        let map = unsafe {
            mmap_anonymous(
                None,
                len_nz,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE,
            )
        };
        let ptr = match map {
            Ok(p) => p,
            Err(nix::errno::Errno::ENOMEM) => return RunResult::NoResource,
            Err(_) => return RunResult::Failure,
        };

        let mut mismatch = false;
        unsafe {
            let slice = std::slice::from_raw_parts_mut(ptr.as_ptr() as *mut u8, len);
            for (i, byte) in slice.iter_mut().enumerate() {
                *byte = (i % 256) as u8;
            }
            for (i, byte) in slice.iter().enumerate() {
                if *byte != (i % 256) as u8 {
                    mismatch = true;
                    break;
                }
            }
            if munmap(ptr, len).is_err() {
                return RunResult::Failure;
            }
        }
        if mismatch {
            args.mark_run_ok(false);
            return RunResult::Failure;
        }

        args.bump(1);
        args.mark_counter_ready();
    }
    args.mark_run_ok(true);
    RunResult::Success
}
