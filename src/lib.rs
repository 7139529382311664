//! stressforge: a system-load and stress-exercise harness.
//!
//! The orchestrator forks one worker process per selected stressor instance,
//! supervises them through one of three run regimes (sequential, all at
//! once, or every permutation of a subset), and aggregates what they report
//! back through a process-shared memory arena into a text and YAML report.
//!
//! ## Layout
//!
//! - [`config`] parses the command line into a resolved [`config::Config`].
//! - [`registry`] is the fixed catalogue of available stressors.
//! - [`selection`] turns a `Config` into the ordered list of instances to run.
//! - [`arena`] is the process-shared memory workers report through.
//! - [`signal`] installs and routes the orchestrator's and workers' signal handlers.
//! - [`supervisor`] forks, runs, and reaps the worker processes.
//! - [`metrics`] validates and aggregates what came back through the arena.
//! - [`report`] renders the text and YAML output.
//! - [`stressors`] holds the stressor bodies themselves.

pub mod arena;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod report;
pub mod selection;
pub mod signal;
pub mod stressors;
pub mod supervisor;
pub mod sys;

pub use error::{Error, Result};
