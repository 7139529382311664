//! Maps active instances onto contiguous ranges of [`crate::arena::SharedArena`]
//! slot indices, in dispatch order.

use super::Instance;

/// `(start, end)` arena-slot range for each entry in `instances`, in the
/// same order. Ignored/zero-count instances get an empty `(n, n)` range.
pub fn slot_ranges(instances: &[Instance]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(instances.len());
    let mut cursor = 0usize;
    for inst in instances {
        if inst.is_active() {
            let start = cursor;
            cursor += inst.num_instances as usize;
            ranges.push((start, cursor));
        } else {
            ranges.push((cursor, cursor));
        }
    }
    ranges
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry;
    use crate::selection::{IgnoreRun, Instance};

    fn make(name: &'static str, n: u32, ignore: IgnoreRun) -> Instance {
        let stressor = registry::find_by_name(name).unwrap();
        Instance {
            stressor,
            num_instances: n,
            bogo_ops_target: 0,
            ignore_run: ignore,
            ignore_permute: 0,
            status_counters: [0; 4],
        }
    }

    #[test]
    fn ranges_are_contiguous_and_skip_inactive() {
        let instances = vec![
            make("cpu", 2, IgnoreRun::NotIgnored),
            make("vm", 0, IgnoreRun::NotIgnored),
            make("fork", 3, IgnoreRun::NotIgnored),
            make("hdd", 5, IgnoreRun::Excluded),
        ];
        let ranges = slot_ranges(&instances);
        assert_eq!(ranges, vec![(0, 2), (2, 2), (2, 5), (5, 5)]);
    }
}
