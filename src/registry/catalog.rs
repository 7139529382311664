//! The static stressor table. Adding a stressor means adding one entry here
//! and one module under `crate::stressors` — nothing else in the
//! orchestrator needs to change.

use super::{ClassMask, Stressor, VerifyMode};
use crate::stressors;

pub static STRESSORS: &[Stressor] = &[
    Stressor {
        id: 0,
        name: "noop",
        class_mask: ClassMask::OS,
        verify_mode: VerifyMode::None,
        run_fn: stressors::noop::run,
        supported: None,
    },
    Stressor {
        id: 1,
        name: "cpu",
        class_mask: ClassMask::CPU,
        verify_mode: VerifyMode::Always,
        run_fn: stressors::cpu::run,
        supported: None,
    },
    Stressor {
        id: 2,
        name: "matrix",
        class_mask: ClassMask::CPU_CACHE,
        verify_mode: VerifyMode::Always,
        run_fn: stressors::matrix::run,
        supported: None,
    },
    Stressor {
        id: 3,
        name: "vm",
        class_mask: ClassMask::VM.union(ClassMask::MEMORY),
        verify_mode: VerifyMode::Always,
        run_fn: stressors::vm::run,
        supported: None,
    },
    Stressor {
        id: 4,
        name: "fork",
        class_mask: ClassMask::SCHEDULER,
        verify_mode: VerifyMode::Always,
        run_fn: stressors::fork::run,
        supported: None,
    },
    Stressor {
        id: 5,
        name: "hdd",
        class_mask: ClassMask::FILESYSTEM.union(ClassMask::IO),
        verify_mode: VerifyMode::Always,
        run_fn: stressors::hdd::run,
        supported: Some(stressors::hdd::supported),
    },
    Stressor {
        id: 6,
        name: "pipe",
        class_mask: ClassMask::PIPE,
        verify_mode: VerifyMode::Always,
        run_fn: stressors::pipe::run,
        supported: None,
    },
    Stressor {
        id: 7,
        name: "yield",
        class_mask: ClassMask::SCHEDULER,
        verify_mode: VerifyMode::Optional,
        run_fn: stressors::yield_::run,
        supported: None,
    },
    Stressor {
        id: 8,
        name: "bigheap",
        class_mask: ClassMask::MEMORY.union(ClassMask::PATHOLOGICAL),
        verify_mode: VerifyMode::Optional,
        run_fn: stressors::pathological::run,
        supported: None,
    },
];
