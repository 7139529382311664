//! Process-shared memory arena.
//!
//! Everything here is mapped `MAP_SHARED | MAP_ANONYMOUS` *before* any
//! `fork`, so every worker inherits the same physical pages as the
//! orchestrator. After fork, ownership of each [`StatsSlot`] /
//! [`ChecksumSlot`] pair is exclusive to the worker it was allocated for:
//! the orchestrator never writes a slot it handed out, and a worker never
//! touches any slot but its own. That disjointness is what lets the stats
//! and checksum tables skip inter-process locking entirely — see
//! `DESIGN.md` for the argument in full.

pub mod jenkins;

use std::io::{Error as IoError, Result as IoResult};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use tracing::warn;

use crate::sys;

/// Upper bound on auxiliary (non-bogo-ops) metrics a single stressor instance
/// may report, matching the catalogue's `metrics[MAX]` field.
pub const MAX_METRICS: usize = 8;

/// One auxiliary metric slot. `description` is always a `'static` string
/// baked into the binary's catalogue, so the pointer stays valid across
/// `fork` without needing a shared-heap string duplicate.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Metric {
    pub description: Option<&'static str>,
    pub value: f64,
}

impl Default for Metric {
    fn default() -> Self {
        Metric {
            description: None,
            value: -1.0,
        }
    }
}

/// The bogo-ops counter and its integrity flags. These are touched by the
/// worker's own code and, for `force_killed`, by the worker's own signal
/// handler — hence atomics rather than plain fields.
#[repr(C)]
pub struct CounterInfo {
    pub counter: AtomicU64,
    pub counter_ready: AtomicBool,
    pub run_ok: AtomicBool,
    pub force_killed: AtomicBool,
}

impl CounterInfo {
    fn zeroed() -> Self {
        CounterInfo {
            counter: AtomicU64::new(0),
            counter_ready: AtomicBool::new(false),
            run_ok: AtomicBool::new(false),
            force_killed: AtomicBool::new(false),
        }
    }
}

/// One instance's shared-memory record.
///
/// `pid`, `sigalarmed` and `signalled` are written from signal-handler or
/// cross-process contexts and are therefore atomics. Everything else is a
/// plain field: it is written exactly once, by the worker, strictly before
/// that worker calls `_exit`, and read exactly once, by the orchestrator,
/// strictly after `waitpid` reaps that same pid — there is no window where
/// both sides touch it.
#[repr(C)]
pub struct StatsSlot {
    pub pid: AtomicI32,
    pub counter_info: CounterInfo,
    pub start: f64,
    pub duration: f64,
    pub duration_total: f64,
    pub counter_total: u64,
    pub rusage_utime: f64,
    pub rusage_stime: f64,
    pub rusage_utime_total: f64,
    pub rusage_stime_total: f64,
    pub rusage_maxrss: i64,
    pub sigalarmed: AtomicBool,
    pub completed: bool,
    pub signalled: AtomicBool,
    pub metrics: [Metric; MAX_METRICS],
}

impl StatsSlot {
    fn zeroed() -> Self {
        StatsSlot {
            pid: AtomicI32::new(0),
            counter_info: CounterInfo::zeroed(),
            start: 0.0,
            duration: 0.0,
            duration_total: 0.0,
            counter_total: 0,
            rusage_utime: 0.0,
            rusage_stime: 0.0,
            rusage_utime_total: 0.0,
            rusage_stime_total: 0.0,
            rusage_maxrss: 0,
            sigalarmed: AtomicBool::new(false),
            completed: false,
            signalled: AtomicBool::new(false),
            metrics: [Metric::default(); MAX_METRICS],
        }
    }
}

/// The packed, padding-zeroed payload that gets hashed. Field order and
/// padding are part of the integrity contract: any change here invalidates
/// every previously-recorded hash.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ChecksumData {
    pub counter: u64,
    pub run_ok: bool,
    _pad: [u8; 7],
}

impl ChecksumData {
    pub fn new(counter: u64, run_ok: bool) -> Self {
        ChecksumData {
            counter,
            run_ok,
            _pad: [0; 7],
        }
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ChecksumData` is `repr(C)` with no padding left
        // uninitialized (the `_pad` field is explicit), so reading it as
        // bytes is defined.
        unsafe {
            std::slice::from_raw_parts(
                (self as *const Self) as *const u8,
                std::mem::size_of::<Self>(),
            )
        }
    }
}

#[repr(C)]
pub struct ChecksumSlot {
    pub data: ChecksumData,
    pub hash: u32,
}

impl ChecksumSlot {
    fn zeroed() -> Self {
        ChecksumSlot {
            data: ChecksumData::default(),
            hash: 0,
        }
    }

    /// Recompute and store `hash` from the current `data`.
    pub fn seal(&mut self) {
        self.hash = jenkins::hash(self.data.as_bytes());
    }

    /// Does `hash` match what `data` would currently hash to?
    pub fn is_valid(&self) -> bool {
        jenkins::hash(self.data.as_bytes()) == self.hash
    }
}

/// A trivial test-and-set spinlock for the three cross-cutting shared
/// resources (`perf`, `warn_once`, `net_port_map`) that are only ever held
/// for microseconds. Not fair, not re-entrant — neither property is needed
/// at this hold duration.
#[repr(C)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Addresses of the three standalone guard pages, handed to worker `Args`
/// so stressor bodies can point invalid-memory syscalls at a known target.
///
/// `wo` is mapped `PROT_READ`, not write-only — `libc` has no write-only
/// protection flag bit distinct from `PROT_READ | PROT_WRITE`. What workers
/// actually test is that writing here traps, and a read-only page satisfies
/// that just as well.
#[derive(Clone, Copy)]
pub struct GuardPages {
    pub none: NonNull<u8>,
    pub ro: NonNull<u8>,
    pub wo: NonNull<u8>,
}

/// Shared coordination header: cross-instance counters, the three spinlocks,
/// and the guard page addresses.
#[repr(C)]
pub struct SharedHead {
    pub started: AtomicU32,
    pub exited: AtomicU32,
    pub reaped: AtomicU32,
    pub failed: AtomicU32,
    pub alarmed: AtomicU32,
    pub time_started: f64,
    pub caught_sigint: AtomicBool,
    pub warn_once: SpinLock,
    pub net_port_map: SpinLock,
    pub perf: SpinLock,
    page_none: usize,
    page_ro: usize,
    page_wo: usize,
}

impl SharedHead {
    fn zeroed() -> Self {
        SharedHead {
            started: AtomicU32::new(0),
            exited: AtomicU32::new(0),
            reaped: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            alarmed: AtomicU32::new(0),
            time_started: 0.0,
            caught_sigint: AtomicBool::new(false),
            warn_once: SpinLock::new(),
            net_port_map: SpinLock::new(),
            perf: SpinLock::new(),
            page_none: 0,
            page_ro: 0,
            page_wo: 0,
        }
    }

    pub fn guard_pages(&self) -> GuardPages {
        // SAFETY: populated once at arena allocation time, before any
        // worker is forked, and never mutated afterwards.
        unsafe {
            GuardPages {
                none: NonNull::new_unchecked(self.page_none as *mut u8),
                ro: NonNull::new_unchecked(self.page_ro as *mut u8),
                wo: NonNull::new_unchecked(self.page_wo as *mut u8),
            }
        }
    }
}

fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// A single standalone guard-page mapping, dropped (munmapped) independently
/// of the main arena.
struct GuardPage {
    ptr: NonNull<u8>,
    len: usize,
}

impl GuardPage {
    fn new(prot: i32) -> IoResult<Self> {
        let len = sys::page_size();
        let ptr = sys::mmap_anon_shared(len)?;
        if prot != libc::PROT_READ | libc::PROT_WRITE {
            unsafe { sys::mprotect(ptr, len, prot)? };
        }
        Ok(GuardPage { ptr, len })
    }
}

impl Drop for GuardPage {
    fn drop(&mut self) {
        if let Err(e) = unsafe { sys::munmap(self.ptr, self.len) } {
            warn!(error = %e, "failed to unmap guard page");
        }
    }
}

/// The process-shared arena: one mapping for [`SharedHead`] + the
/// [`StatsSlot`] table, one independent mapping for the [`ChecksumSlot`]
/// table, and three standalone guard pages.
///
/// Keeping the checksum table in its own mapping means a worker that
/// corrupts its own (or, via a bug, a neighbor's) `StatsSlot` cannot also
/// silently corrupt the checksum used to detect that corruption.
pub struct SharedArena {
    base: NonNull<u8>,
    region_len: usize,
    usable_len: usize,
    stats_offset: usize,
    num_slots: usize,

    checksum_base: NonNull<u8>,
    checksum_region_len: usize,

    guard_none: GuardPage,
    guard_ro: GuardPage,
    guard_wo: GuardPage,
}

// SAFETY: access to `SharedArena` after fork is partitioned by the
// disjoint-slot ownership invariant documented on `StatsSlot`; before fork
// it is only ever touched from the single orchestrator thread.
unsafe impl Send for SharedArena {}
unsafe impl Sync for SharedArena {}

impl SharedArena {
    pub fn allocate(num_slots: usize) -> IoResult<Self> {
        let page = sys::page_size();
        let head_len = std::mem::size_of::<SharedHead>();
        let stats_offset = align_up(head_len, std::mem::align_of::<StatsSlot>());
        let stats_len = num_slots * std::mem::size_of::<StatsSlot>();
        let region_len = sys::page_round_up(stats_offset + stats_len + 2 * page);

        let base = sys::mmap_anon_shared(region_len)?;

        let usable_len = protect_trailing_guard(base, region_len, page);

        let checksum_len = num_slots * std::mem::size_of::<ChecksumSlot>();
        let checksum_region_len = sys::page_round_up(checksum_len + page);
        let checksum_base = sys::mmap_anon_shared(checksum_region_len)?;

        let guard_none = GuardPage::new(libc::PROT_NONE)?;
        let guard_ro = GuardPage::new(libc::PROT_READ)?;
        // See `GuardPages` doc comment: "wo" is intentionally PROT_READ.
        let guard_wo = GuardPage::new(libc::PROT_READ)?;

        let arena = SharedArena {
            base,
            region_len,
            usable_len,
            stats_offset,
            num_slots,
            checksum_base,
            checksum_region_len,
            guard_none,
            guard_ro,
            guard_wo,
        };

        // SAFETY: the region was just mapped MAP_SHARED|MAP_ANONYMOUS, so
        // it is already zero-filled by the kernel; writing `SharedHead` in
        // place here is the one time the orchestrator has exclusive access
        // before any worker exists.
        unsafe {
            let head_ptr = arena.base.as_ptr() as *mut SharedHead;
            head_ptr.write(SharedHead::zeroed());
            let head = &mut *head_ptr;
            head.page_none = guard_none_addr(&arena);
            head.page_ro = arena.guard_ro.ptr.as_ptr() as usize;
            head.page_wo = arena.guard_wo.ptr.as_ptr() as usize;

            for i in 0..num_slots {
                arena.stats_ptr(i).write(StatsSlot::zeroed());
                arena.checksum_ptr(i).write(ChecksumSlot::zeroed());
            }
        }

        Ok(arena)
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn head(&self) -> &SharedHead {
        unsafe { &*(self.base.as_ptr() as *const SharedHead) }
    }

    fn stats_ptr(&self, idx: usize) -> *mut StatsSlot {
        assert!(idx < self.num_slots, "stats index {idx} out of range");
        let offset = self.stats_offset + idx * std::mem::size_of::<StatsSlot>();
        unsafe { self.base.as_ptr().add(offset) as *mut StatsSlot }
    }

    pub fn stats(&self, idx: usize) -> &StatsSlot {
        unsafe { &*self.stats_ptr(idx) }
    }

    /// # Safety
    /// The caller must be the single owner of slot `idx` (the worker
    /// process that was forked for it, before it exits).
    pub unsafe fn stats_mut(&self, idx: usize) -> &mut StatsSlot {
        &mut *self.stats_ptr(idx)
    }

    fn checksum_ptr(&self, idx: usize) -> *mut ChecksumSlot {
        assert!(idx < self.num_slots, "checksum index {idx} out of range");
        unsafe {
            (self.checksum_base.as_ptr() as *mut ChecksumSlot).add(idx)
        }
    }

    pub fn checksum(&self, idx: usize) -> &ChecksumSlot {
        unsafe { &*self.checksum_ptr(idx) }
    }

    /// # Safety
    /// Same ownership requirement as [`Self::stats_mut`].
    pub unsafe fn checksum_mut(&self, idx: usize) -> &mut ChecksumSlot {
        &mut *self.checksum_ptr(idx)
    }

    pub fn guard_pages(&self) -> GuardPages {
        self.head().guard_pages()
    }
}

fn guard_none_addr(arena: &SharedArena) -> usize {
    arena.guard_none.ptr.as_ptr() as usize
}

/// Re-protect the trailing page of `base..base+region_len` as `PROT_NONE`,
/// falling back to `PROT_READ`, falling back to just reporting a shorter
/// usable length if neither mprotect call succeeds.
fn protect_trailing_guard(base: NonNull<u8>, region_len: usize, page: usize) -> usize {
    let guard_offset = region_len - page;
    let guard_ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(guard_offset)) };

    match unsafe { sys::mprotect(guard_ptr, page, libc::PROT_NONE) } {
        Ok(()) => return region_len,
        Err(e) => warn!(error = %e, "mprotect(PROT_NONE) on trailing guard page failed, trying PROT_READ"),
    }
    match unsafe { sys::mprotect(guard_ptr, page, libc::PROT_READ) } {
        Ok(()) => return region_len,
        Err(e) => warn!(error = %e, "mprotect(PROT_READ) on trailing guard page failed, shortening usable region"),
    }
    guard_offset
}

impl Drop for SharedArena {
    fn drop(&mut self) {
        // Unmaps the checksum table and the main region explicitly; the
        // three standalone `GuardPage` fields unmap themselves afterwards
        // via their own `Drop`, in field declaration order.
        if let Err(e) = unsafe { sys::munmap(self.checksum_base, self.checksum_region_len) } {
            warn!(error = %e, "failed to unmap checksum arena");
        }
        if let Err(e) = unsafe { sys::munmap(self.base, self.region_len) } {
            warn!(error = %e, "failed to unmap stats arena");
        }
        let _ = self.usable_len; // retained for diagnostics / future shrink-aware readers
    }
}

/// A fatal error while establishing the arena — always an I/O error from an
/// underlying mmap/mprotect syscall.
pub type Error = IoError;
