//! CLI entry point: parse configuration, select stressors, allocate the
//! shared arena, run the chosen regime, and report.

use std::process::ExitCode as ProcessExitCode;

use tracing_subscriber::EnvFilter;

use stressforge::config::Config;
use stressforge::report::ExitCode;
use stressforge::{arena, metrics, registry, report, selection, signal, supervisor};

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Print a class's members (`--class net?`) or the full stressor catalogue
/// and return `true` if the caller should exit immediately afterwards.
fn handle_help_queries(config: &Config) -> bool {
    if let Some(class) = &config.class {
        if let Some(suffix) = class.strip_suffix('?') {
            match registry::find_class(suffix) {
                Some(mask) => {
                    for s in registry::members_of(mask) {
                        println!("{}", registry::munge(s.name));
                    }
                }
                None => eprintln!("stressforge: unknown class '{suffix}'"),
            }
            return true;
        }
    }
    false
}

fn run() -> stressforge::error::Result<ExitCode> {
    install_tracing();

    let argv: Vec<String> = std::env::args().collect();
    let config = Config::parse_argv(&argv)?;

    if handle_help_queries(&config) {
        return Ok(ExitCode::Success);
    }

    // SAFETY: called once, before any fork and before any other thread exists.
    unsafe { signal::install_parent_handlers()? };

    let mut instances = selection::select(&config)?;
    let total = selection::total_active(&instances);
    if total == 0 {
        tracing::warn!("no stressors selected; nothing to do");
        return Ok(ExitCode::Success);
    }

    let slot_ranges = selection::slot_ranges(&instances);
    let arena = arena::SharedArena::allocate(total)?;

    if let Some(timeout) = config.timeout {
        let _ = nix::unistd::alarm::set(timeout.as_secs() as u32);
    }

    let run_result = supervisor::regime::run(&config, &mut instances, &arena, &slot_ranges)?;

    let integrity_ok = metrics::validate_all(&arena, &instances, &slot_ranges);

    let reports: Vec<report::StressorReport> = instances
        .iter()
        .zip(&slot_ranges)
        .filter(|(inst, _)| inst.is_active() || inst.num_instances > 0)
        .map(|(inst, &(start, end))| {
            let completed = (start..end).filter(|&i| arena.stats(i).completed).count() as u32;
            report::StressorReport {
                name: inst.stressor.name,
                num_instances: inst.num_instances,
                completed_instances: completed,
                status_counters: inst.status_counters,
                metrics: metrics::aggregate(&arena, start, end, completed),
            }
        })
        .collect();

    let text = report::render_text(&reports, config.metrics_brief, config.scientific_notation);
    let summary = report::render_status_summary(&instances);
    print!("{text}");
    print!("{summary}");

    let times = report::RunTimes {
        run_time: run_result.duration.as_secs_f64(),
        available_cpu_time: run_result.duration.as_secs_f64() * total as f64,
        user_time: reports.iter().map(|r| r.metrics.user_time).sum(),
        system_time: reports.iter().map(|r| r.metrics.system_time).sum(),
        load_average: read_load_average(),
    };
    let yaml = report::render_yaml(&reports, times, config.scientific_notation)?;
    report::write_reports(&config, &text, &yaml)?;

    let mut exit_code = run_result.outcome.exit_code();
    if !integrity_ok && exit_code == ExitCode::Success {
        exit_code = ExitCode::MetricsUntrustworthy;
    }
    if signal::caught_sigint() {
        return Ok(ExitCode::Signaled);
    }
    Ok(exit_code)
}

fn read_load_average() -> (f64, f64, f64) {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| {
            let mut it = s.split_whitespace();
            let a = it.next()?.parse().ok()?;
            let b = it.next()?.parse().ok()?;
            let c = it.next()?.parse().ok()?;
            Some((a, b, c))
        })
        .unwrap_or((0.0, 0.0, 0.0))
}

fn main() -> ProcessExitCode {
    match run() {
        Ok(code) => ProcessExitCode::from(code as u8),
        Err(e) => {
            eprintln!("stressforge: {e}");
            ProcessExitCode::from(ExitCode::Failure as u8)
        }
    }
}
