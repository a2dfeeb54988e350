use chrono::Utc;

use crate::models::{EntryType, LogEntry, Statistics};

use super::rules::classify_all;

/// Sum classified entries into a snapshot stamped with the current time.
pub fn aggregate<'a, I>(entries: I) -> Statistics
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    let mut dumps = 0u64;
    let mut stacks = 0u64;
    let mut warnings = 0u64;
    let mut errors = 0u64;

    for entry in entries {
        match entry.entry_type {
            EntryType::DumpingStacks => dumps += 1,
            EntryType::DumpingStack => stacks += 1,
            EntryType::Warning => warnings += 1,
            EntryType::Error => errors += 1,
            EntryType::Info | EntryType::Unknown => {}
        }
    }

    Statistics::new(Utc::now(), dumps, stacks, warnings, errors)
}

/// Raw lines straight to counters.
pub fn aggregate_lines<I, S>(lines: I) -> Statistics
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let entries = classify_all(lines);
    aggregate(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_reference_scenario() {
        let lines = [
            "[07/29/2025 - 01:00:00PM] Dumping Stacks",
            "[07/29/2025 - 01:00:01PM] warning: x",
            "[07/29/2025 - 01:00:02PM] error: y",
            "[07/29/2025 - 01:00:03PM] Dumping Stack 1:",
        ];

        let stats = aggregate_lines(lines);
        assert_eq!(stats.dumps, 1);
        assert_eq!(stats.stacks, 1);
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.ratio, 1.0);
    }

    #[test]
    fn info_and_unknown_do_not_count() {
        let stats = aggregate_lines([
            "[07/29/2025 - 01:00:00PM] server started",
            "garbage \u{0} \u{fffd}",
            "[not a timestamp] Dumping",
        ]);

        assert!(stats.same_counts(&Statistics::empty(Utc::now())));
        assert_eq!(stats.ratio, 0.0);
    }

    #[test]
    fn empty_input_gives_zero_snapshot() {
        let stats = aggregate(&Vec::<LogEntry>::new());
        assert_eq!((stats.dumps, stats.stacks, stats.warnings, stats.errors), (0, 0, 0, 0));
    }

    #[test]
    fn ratio_with_multiple_stacks_per_dump() {
        let stats = aggregate_lines([
            "[07/29/2025 - 01:00:00PM] Dumping Stacks",
            "[07/29/2025 - 01:00:00PM] Dumping Stack 1:",
            "[07/29/2025 - 01:00:00PM] Dumping Stack 2:",
            "[07/29/2025 - 01:00:00PM] Dumping Stack 3:",
            "[07/29/2025 - 01:00:00PM] Dumping Stack 4:",
        ]);

        assert_eq!(stats.dumps, 1);
        assert_eq!(stats.stacks, 4);
        assert_eq!(stats.ratio, 0.25);
    }
}
