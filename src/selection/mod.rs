//! Builds the active stressor list from CLI intent: per-stressor counts,
//! regime defaults, `--with`/`--class` restriction, unsupported/pathological
//! exclusion, and `--random` sampling. Order matters — each step below can
//! see and override what the previous one set.

pub mod slots;

use rand::Rng;

use crate::config::{Config, Regime};
use crate::error::{Error, Result};
use crate::registry::{self, ClassMask, Stressor};

pub use slots::slot_ranges;

/// Why an instance's worker body should not actually be launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreRun {
    NotIgnored,
    Unsupported,
    Excluded,
}

/// One active stressor and how many times to run it.
pub struct Instance {
    pub stressor: &'static Stressor,
    pub num_instances: u32,
    pub bogo_ops_target: u64,
    pub ignore_run: IgnoreRun,
    /// Bit `j` set means "exclude from permutation round `j`"; only
    /// meaningful under the `Permute` regime.
    pub ignore_permute: u32,
    /// Per-outcome-bucket counts, indexed by [`crate::metrics::Bucket`] as usize.
    pub status_counters: [u32; 4],
}

impl Instance {
    fn new(stressor: &'static Stressor) -> Self {
        Instance {
            stressor,
            num_instances: 0,
            bogo_ops_target: 0,
            ignore_run: IgnoreRun::NotIgnored,
            ignore_permute: 0,
            status_counters: [0; 4],
        }
    }

    pub fn is_active(&self) -> bool {
        self.num_instances > 0 && self.ignore_run == IgnoreRun::NotIgnored
    }
}

/// Resolve a count argument: 0 → configured processors, negative → online
/// processors, positive → verbatim (subject to the caller checking it
/// against the max ceiling).
pub fn resolve_n(n: i64) -> u32 {
    if n == 0 {
        processors_configured()
    } else if n < 0 {
        processors_online()
    } else {
        n as u32
    }
}

pub fn processors_configured() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// No cheap portable "online, excluding offlined cores" primitive exists in
/// std; treat online == configured, matching what most hosts report anyway.
pub fn processors_online() -> u32 {
    processors_configured()
}

/// Hard ceiling on any single stressor's instance count, independent of host
/// core count — this exists purely to catch fat-fingered `--cpu 999999999`.
pub const MAX_STRESSORS: u32 = 4096;

pub fn check_max_stressors(n: u32) -> Result<u32> {
    if n > MAX_STRESSORS {
        Err(Error::TooManyInstances(n as i64, MAX_STRESSORS as i64))
    } else {
        Ok(n)
    }
}

/// Build the ordered active-stressor list for `config`.
pub fn select(config: &Config) -> Result<Vec<Instance>> {
    let mut instances: Vec<Instance> = registry::iter().map(Instance::new).collect();

    // Step 1: explicit per-stressor counts from the command line.
    let mut any_set = false;
    for (name, count) in &config.stressor_counts {
        let idx = find_index(&instances, name)
            .ok_or_else(|| Error::UnknownStressor(name.clone()))?;
        instances[idx].num_instances = check_max_stressors(resolve_n(*count))?;
        any_set = true;
    }
    for (name, ops) in &config.stressor_ops {
        let idx = find_index(&instances, name)
            .ok_or_else(|| Error::UnknownStressor(name.clone()))?;
        instances[idx].bogo_ops_target = *ops;
    }

    let with_active = config.with.is_some();

    // Step 2: regime-driven blanket enable, only if nothing was explicitly
    // set and `--with` isn't restricting the set.
    if let Some(regime) = config.regime {
        let n = check_max_stressors(resolve_n(regime.count()))?;
        if !any_set && !with_active {
            for inst in &mut instances {
                inst.num_instances = n;
            }
        }
        // Step 3: `--with` restricts to a named subset at regime's N.
        if let Some(with) = &config.with {
            for name in with {
                let idx = find_index(&instances, name)
                    .ok_or_else(|| Error::UnknownStressor(name.clone()))?;
                instances[idx].num_instances = n;
            }
        }
    } else if with_active {
        return Err(Error::WithWithoutRegime);
    }

    // Step 4: restrict to a class, if given.
    if let Some(class_name) = &config.class {
        let mask = registry::find_class(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.clone()))?;
        for inst in &mut instances {
            if !inst.stressor.class_mask.intersects(mask) {
                inst.num_instances = 0;
            }
        }
    }

    // Step 5: exclude unsupported hosts.
    for inst in &mut instances {
        if inst.num_instances == 0 {
            continue;
        }
        if let Some(supported) = inst.stressor.supported {
            if !supported() {
                inst.ignore_run = IgnoreRun::Unsupported;
            }
        }
    }

    // Step 6: exclude pathological stressors unless opted in.
    if !config.pathological {
        for inst in &mut instances {
            if inst.num_instances == 0 || inst.ignore_run != IgnoreRun::NotIgnored {
                continue;
            }
            if inst.stressor.class_mask.contains(ClassMask::PATHOLOGICAL) {
                tracing::warn!(
                    stressor = registry::munge(inst.stressor.name),
                    "disabled, may hang or reboot the machine (use --pathological to enable)"
                );
                inst.ignore_run = IgnoreRun::Excluded;
            }
        }
    }

    // Step 7: user-requested exclusion.
    for name in &config.exclude {
        if let Some(idx) = find_index(&instances, name) {
            if instances[idx].num_instances > 0 {
                instances[idx].ignore_run = IgnoreRun::Excluded;
            }
        }
    }

    // Step 8: `--random N` samples with replacement from what's currently
    // enabled and not-ignored, incrementing each pick's count by one.
    if let Some(random_n) = config.random {
        let universe: Vec<usize> = instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.num_instances > 0 && i.ignore_run == IgnoreRun::NotIgnored)
            .map(|(idx, _)| idx)
            .collect();
        if !universe.is_empty() {
            let mut rng = crate::config::seeded_rng(config.seed);
            for _ in 0..random_n {
                let pick = universe[rng.gen_range(0..universe.len())];
                instances[pick].num_instances += 1;
            }
        }
    }

    Ok(instances)
}

fn find_index(instances: &[Instance], name: &str) -> Option<usize> {
    instances
        .iter()
        .position(|i| registry::munge(i.stressor.name) == registry::munge(name))
}

/// Total live (not-ignored, num_instances > 0) instance count across the
/// whole selection.
pub fn total_active(instances: &[Instance]) -> usize {
    instances
        .iter()
        .filter(|i| i.is_active())
        .map(|i| i.num_instances as usize)
        .sum()
}

impl Regime {
    pub fn count(self) -> i64 {
        match self {
            Regime::Sequential(n) | Regime::All(n) | Regime::Permute(n) => n,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;

    fn base_config() -> Config {
        Config {
            regime: Some(Regime::All(2)),
            ..Config::default()
        }
    }

    #[test]
    fn all_regime_enables_every_stressor_with_same_count() {
        let config = base_config();
        let instances = select(&config).unwrap();
        assert!(instances.iter().all(|i| i.num_instances == 2));
    }

    #[test]
    fn with_restricts_to_named_subset() {
        let mut config = base_config();
        config.with = Some(vec!["cpu".into(), "vm".into()]);
        let instances = select(&config).unwrap();
        for inst in &instances {
            let expected = matches!(inst.stressor.name, "cpu" | "vm");
            assert_eq!(inst.num_instances > 0, expected, "{}", inst.stressor.name);
        }
    }

    #[test]
    fn pathological_excluded_by_default() {
        let config = base_config();
        let instances = select(&config).unwrap();
        let bigheap = instances.iter().find(|i| i.stressor.name == "bigheap").unwrap();
        assert_eq!(bigheap.ignore_run, IgnoreRun::Excluded);
    }

    #[test]
    fn pathological_flag_allows_it() {
        let mut config = base_config();
        config.pathological = true;
        let instances = select(&config).unwrap();
        let bigheap = instances.iter().find(|i| i.stressor.name == "bigheap").unwrap();
        assert_eq!(bigheap.ignore_run, IgnoreRun::NotIgnored);
    }

    #[test]
    fn class_filter_restricts_to_members() {
        let mut config = base_config();
        config.class = Some("vm".into());
        let instances = select(&config).unwrap();
        for inst in &instances {
            if inst.stressor.name == "vm" {
                assert!(inst.num_instances > 0);
            } else {
                assert_eq!(inst.num_instances, 0);
            }
        }
    }

    #[test]
    fn exclude_list_tags_excluded() {
        let mut config = base_config();
        config.exclude = vec!["cpu".into()];
        let instances = select(&config).unwrap();
        let cpu = instances.iter().find(|i| i.stressor.name == "cpu").unwrap();
        assert_eq!(cpu.ignore_run, IgnoreRun::Excluded);
    }

    #[test]
    fn with_without_regime_is_an_error() {
        let config = Config {
            with: Some(vec!["cpu".into()]),
            ..Config::default()
        };
        assert!(matches!(select(&config), Err(Error::WithWithoutRegime)));
    }

    #[test]
    fn unknown_stressor_in_with_is_an_error() {
        let mut config = base_config();
        config.with = Some(vec!["not-a-real-stressor".into()]);
        assert!(matches!(select(&config), Err(Error::UnknownStressor(_))));
    }
}
