use thiserror::Error;

/// Orchestrator-visible failure taxonomy.
///
/// Matches the classification in the design doc: configuration mistakes are
/// distinct from resource exhaustion, which is distinct from a worker simply
/// behaving badly. Only the first two ever abort the run outright; the rest
/// are folded into the run's four success flags and reported at the end.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown stressor: {0}")]
    UnknownStressor(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("mutually exclusive options: {0} and {1}")]
    MutuallyExclusive(&'static str, &'static str),

    #[error("--with requires one of --sequential, --all/--parallel, --permute, or --random")]
    WithWithoutRegime,

    #[error("instance count {0} exceeds the maximum of {1}")]
    TooManyInstances(i64, i64),

    #[error("failed to allocate shared arena: {0}")]
    Arena(#[from] std::io::Error),

    #[error("fork failed after {0} retries: {1}")]
    ForkFailed(u32, std::io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] nix::Error),

    #[error("failed to write report: {0}")]
    Report(std::io::Error),

    #[error("failed to serialize YAML report: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Cli(#[from] clap::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
