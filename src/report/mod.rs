//! Text and YAML report emission.

use std::io::Write;

use serde::Serialize;

use crate::config::Config;
use crate::metrics::{Bucket, StressorMetrics};
use crate::registry;
use crate::selection::{IgnoreRun, Instance};

/// Process exit codes. A worker's own `_exit` code is drawn from the same
/// space (`NotSuccess` is the one variant only ever produced by the
/// orchestrator's own aggregation, never by a worker).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    NotSuccess = 2,
    NoResource = 3,
    NotImplemented = 4,
    Signaled = 5,
    BySysExit = 6,
    MetricsUntrustworthy = 7,
}

impl ExitCode {
    pub fn from_raw(code: i32) -> Option<ExitCode> {
        Some(match code {
            0 => ExitCode::Success,
            1 => ExitCode::Failure,
            2 => ExitCode::NotSuccess,
            3 => ExitCode::NoResource,
            4 => ExitCode::NotImplemented,
            5 => ExitCode::Signaled,
            6 => ExitCode::BySysExit,
            7 => ExitCode::MetricsUntrustworthy,
            _ => return None,
        })
    }

    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::Failure => "stressforge core failure",
            ExitCode::NotSuccess => "not all stressors passed",
            ExitCode::NoResource => "no resources",
            ExitCode::NotImplemented => "not implemented",
            ExitCode::Signaled => "killed by signal",
            ExitCode::BySysExit => "stressor terminated by an unexpected exit path",
            ExitCode::MetricsUntrustworthy => "metrics may be untrustworthy",
        }
    }
}

/// One finished stressor's full report row: its aggregated metrics plus
/// the per-bucket instance counts.
pub struct StressorReport {
    pub name: &'static str,
    pub num_instances: u32,
    pub completed_instances: u32,
    pub status_counters: [u32; 4],
    pub metrics: StressorMetrics,
}

/// A YAML-bound float, formatted at serialization time as either a plain
/// number or (`--sn`) an explicit scientific-notation string.
///
/// `serde_yaml`'s own `f64` writer has no `%e` mode, so carrying the flag
/// alongside each value and branching in [`Serialize::serialize`] is the
/// only way `--sn` reaches the YAML stream the way it already reaches
/// [`render_text`]'s `%f`/`%e` choice.
#[derive(Clone, Copy)]
struct YamlFloat(f64, bool);

impl Serialize for YamlFloat {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.1 {
            serializer.serialize_str(&format!("{:e}", self.0))
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

#[derive(Serialize)]
struct YamlMetric {
    stressor: String,
    #[serde(rename = "bogo-ops")]
    bogo_ops: u64,
    #[serde(rename = "bogo-ops-per-second-usr-sys-time")]
    bogo_ops_per_second_usr_sys_time: YamlFloat,
    #[serde(rename = "bogo-ops-per-second-real-time")]
    bogo_ops_per_second_real_time: YamlFloat,
    #[serde(rename = "wall-clock-time")]
    wall_clock_time: YamlFloat,
    #[serde(rename = "user-time")]
    user_time: YamlFloat,
    #[serde(rename = "system-time")]
    system_time: YamlFloat,
    #[serde(rename = "cpu-usage-per-instance")]
    cpu_usage_per_instance: YamlFloat,
    #[serde(rename = "max-rss")]
    max_rss: i64,
    #[serde(flatten)]
    auxiliary: std::collections::BTreeMap<String, YamlFloat>,
}

#[derive(Serialize)]
struct YamlTimes {
    #[serde(rename = "run-time")]
    run_time: YamlFloat,
    #[serde(rename = "available-cpu-time")]
    available_cpu_time: YamlFloat,
    #[serde(rename = "user-time")]
    user_time: YamlFloat,
    #[serde(rename = "system-time")]
    system_time: YamlFloat,
    #[serde(rename = "total-time")]
    total_time: YamlFloat,
    #[serde(rename = "user-time-percent")]
    user_time_percent: YamlFloat,
    #[serde(rename = "system-time-percent")]
    system_time_percent: YamlFloat,
    #[serde(rename = "total-time-percent")]
    total_time_percent: YamlFloat,
    #[serde(rename = "load-average-1-minute")]
    load_average_1: YamlFloat,
    #[serde(rename = "load-average-5-minute")]
    load_average_5: YamlFloat,
    #[serde(rename = "load-average-15-minute")]
    load_average_15: YamlFloat,
}

#[derive(Serialize)]
struct YamlDocument {
    metrics: Vec<YamlMetric>,
    times: YamlTimes,
}

/// Wall-clock / CPU-time summary for the `times:` YAML block.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunTimes {
    pub run_time: f64,
    pub available_cpu_time: f64,
    pub user_time: f64,
    pub system_time: f64,
    pub load_average: (f64, f64, f64),
}

pub fn munge_yaml_description(description: &str) -> String {
    registry::munge(description).to_lowercase().replace(' ', "-")
}

/// Render the tabular per-stressor metrics text report.
pub fn render_text(reports: &[StressorReport], metrics_brief: bool, sn: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<13} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
        "stressor", "bogo ops", "real time", "usr time", "sys time", "bogo ops/s", "bogo ops/s"
    ));
    for r in reports {
        if r.completed_instances == 0 {
            continue;
        }
        let munged = registry::munge(r.name);
        let fmt = |v: f64| if sn { format!("{v:.2e}") } else { format!("{v:.2}") };
        out.push_str(&format!(
            "{:<13} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
            munged,
            r.metrics.bogo_ops,
            fmt(r.metrics.wall_clock_time),
            fmt(r.metrics.user_time),
            fmt(r.metrics.system_time),
            fmt(r.metrics.bogo_ops_per_second_usr_sys_time),
            fmt(r.metrics.bogo_ops_per_second_real_time),
        ));
    }

    if !metrics_brief {
        let any_aux = reports.iter().any(|r| !r.metrics.auxiliary.is_empty());
        if any_aux {
            out.push_str("\nmiscellaneous metrics:\n");
            for r in reports {
                let munged = registry::munge(r.name);
                for (description, value) in &r.metrics.auxiliary {
                    let value_str = if sn { format!("{value:.2e}") } else { format!("{value:.2}") };
                    out.push_str(&format!(
                        "{:<13} {:>13} {} (geometric mean of {} instances)\n",
                        munged, value_str, description, r.completed_instances
                    ));
                }
            }
        }
    }

    out
}

/// Render the `skipped`/`passed`/`failed`/`metrics untrustworthy` summary
/// lines, exactly as `stress_exit_status_type` does: `name: N: a (c) b (c)`
/// for a nonzero bucket, `name: 0` for an empty one. `Skipped` additionally
/// counts fully-ignored stressors by their `num_instances`.
pub fn render_status_summary(instances: &[Instance]) -> String {
    let mut out = String::new();
    out.push_str(&status_line("skipped", Bucket::Skipped, instances));
    out.push_str(&status_line("passed", Bucket::Passed, instances));
    out.push_str(&status_line("failed", Bucket::Failed, instances));
    out.push_str(&status_line("metrics untrustworthy", Bucket::BadMetrics, instances));
    out
}

fn status_line(label: &str, bucket: Bucket, instances: &[Instance]) -> String {
    let mut total = 0u32;
    let mut parts = Vec::new();

    for inst in instances {
        let mut count = inst.status_counters[bucket as usize];
        if inst.ignore_run != IgnoreRun::NotIgnored && bucket == Bucket::Skipped {
            count = inst.num_instances;
        }
        if count > 0 {
            parts.push(format!("{} ({})", registry::munge(inst.stressor.name), count));
            total += count;
        }
    }

    if total > 0 {
        format!("{}: {}: {}\n", label, total, parts.join(" "))
    } else {
        format!("{label}: 0\n")
    }
}

/// Serialize the full YAML report. `sn` selects `%e` (scientific notation)
/// over the default `%f`-style plain float for every float field, via
/// [`YamlFloat`].
pub fn render_yaml(reports: &[StressorReport], times: RunTimes, sn: bool) -> crate::error::Result<String> {
    let f = |v: f64| YamlFloat(v, sn);

    let metrics = reports
        .iter()
        .filter(|r| r.completed_instances > 0)
        .map(|r| {
            let auxiliary = r
                .metrics
                .auxiliary
                .iter()
                .map(|(desc, value)| (munge_yaml_description(desc), f(*value)))
                .collect();
            YamlMetric {
                stressor: registry::munge(r.name),
                bogo_ops: r.metrics.bogo_ops,
                bogo_ops_per_second_usr_sys_time: f(r.metrics.bogo_ops_per_second_usr_sys_time),
                bogo_ops_per_second_real_time: f(r.metrics.bogo_ops_per_second_real_time),
                wall_clock_time: f(r.metrics.wall_clock_time),
                user_time: f(r.metrics.user_time),
                system_time: f(r.metrics.system_time),
                cpu_usage_per_instance: f(r.metrics.cpu_usage_per_instance),
                max_rss: r.metrics.max_rss,
                auxiliary,
            }
        })
        .collect();

    let total_time = times.user_time + times.system_time;
    let doc = YamlDocument {
        metrics,
        times: YamlTimes {
            run_time: f(times.run_time),
            available_cpu_time: f(times.available_cpu_time),
            user_time: f(times.user_time),
            system_time: f(times.system_time),
            total_time: f(total_time),
            user_time_percent: f(percent(times.user_time, times.run_time)),
            system_time_percent: f(percent(times.system_time, times.run_time)),
            total_time_percent: f(percent(total_time, times.run_time)),
            load_average_1: f(times.load_average.0),
            load_average_5: f(times.load_average.1),
            load_average_15: f(times.load_average.2),
        },
    };

    let body = serde_yaml::to_string(&doc).map_err(crate::error::Error::Yaml)?;
    Ok(format!("---\n{body}...\n"))
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        100.0 * part / whole
    } else {
        0.0
    }
}

/// Append `contents` to `path`, creating it if necessary — the opt-in,
/// append-only report sink for `--yaml`/`--log-file`.
pub fn append_to_file(path: &std::path::Path, contents: &str) -> crate::error::Result<()> {
    use std::fs::OpenOptions;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(crate::error::Error::Report)?;
    file.write_all(contents.as_bytes()).map_err(crate::error::Error::Report)
}

pub fn write_reports(config: &Config, text: &str, yaml: &str) -> crate::error::Result<()> {
    if let Some(path) = &config.yaml_path {
        append_to_file(path, yaml)?;
    }
    if let Some(path) = &config.log_file {
        append_to_file(path, text)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_line_empty_bucket_prints_zero() {
        let instances: Vec<Instance> = Vec::new();
        let line = status_line("passed", Bucket::Passed, &instances);
        assert_eq!(line, "passed: 0\n");
    }

    #[test]
    fn munge_yaml_description_lowercases_and_hyphenates() {
        assert_eq!(munge_yaml_description("Geometric_Mean Rate"), "geometric-mean-rate");
    }
}
