use std::collections::{BTreeMap, HashSet};

use log::info;

use crate::extractor::EventExtractor;
use crate::messages::DeviceSnapshot;
use crate::store::ActivationCounts;

/// State derived from every snapshot observed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tallies {
    pub counts: ActivationCounts,
    /// Last report string per device, display only.
    pub last_reports: BTreeMap<String, String>,
    /// Last update token per device. The dedup key.
    pub last_tokens: BTreeMap<String, String>,
}

/// Which maps a commit actually replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changed {
    pub counts: bool,
    pub reports: bool,
    pub tokens: bool,
}

impl Changed {
    pub fn any(&self) -> bool {
        self.counts || self.reports || self.tokens
    }
}

/// Merge a fresh snapshot sequence into the previous tallies.
///
/// A device is counted when its report is an activation and its update token
/// is non-empty and differs from the last one observed, at most once per
/// pass. Devices missing from `snapshots` keep their previous entries.
pub fn reconcile(
    prev: &Tallies,
    snapshots: &[DeviceSnapshot],
    extractor: &EventExtractor,
) -> Tallies {
    let mut next = prev.clone();
    let mut counted = HashSet::new();

    for device in snapshots {
        let msg = device.last_report.as_deref().unwrap_or_default();
        let upd = device.last_updated.as_deref().unwrap_or_default();
        let prev_token = prev.last_tokens.get(&device.name).map(String::as_str);

        if extractor.is_activation(Some(msg))
            && !upd.is_empty()
            && prev_token != Some(upd)
            && counted.insert(device.name.as_str())
        {
            let count = next.counts.entry(device.name.clone()).or_insert(0);
            *count = count.saturating_add(1);
            info!("Activation on {} at {} (total {})", device.name, upd, count);
        }

        next.last_reports.insert(device.name.clone(), msg.to_string());
        next.last_tokens.insert(device.name.clone(), upd.to_string());
    }

    next
}

impl Tallies {
    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Replace only the maps that differ from `next`.
    pub fn commit(&mut self, next: Tallies) -> Changed {
        let mut changed = Changed::default();
        if next.counts != self.counts {
            self.counts = next.counts;
            changed.counts = true;
        }
        if next.last_reports != self.last_reports {
            self.last_reports = next.last_reports;
            changed.reports = true;
        }
        if next.last_tokens != self.last_tokens {
            self.last_tokens = next.last_tokens;
            changed.tokens = true;
        }
        changed
    }

    pub fn reset_one(&mut self, name: &str) {
        self.counts.insert(name.to_string(), 0);
    }

    pub fn reset_all(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MARKERS;
    use crate::messages::snapshot as snap;

    fn apply(tallies: &mut Tallies, snapshots: &[DeviceSnapshot]) -> Changed {
        let extractor = EventExtractor::new(DEFAULT_MARKERS);
        let next = reconcile(tallies, snapshots, &extractor);
        tallies.commit(next)
    }

    #[test]
    fn test_scenario_token_dedup() {
        let mut tallies = Tallies::default();

        apply(&mut tallies, &[snap("dev1", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev1"), 1);

        let changed = apply(&mut tallies, &[snap("dev1", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev1"), 1);
        assert!(!changed.any());

        apply(&mut tallies, &[snap("dev1", "LED ON", "t2")]);
        assert_eq!(tallies.count("dev1"), 2);
    }

    #[test]
    fn test_non_events_never_count() {
        let mut tallies = Tallies::default();
        for (i, report) in ["idle", "", "LED OFF", "idle"].iter().enumerate() {
            apply(&mut tallies, &[snap("dev1", report, &format!("t{i}"))]);
        }
        assert_eq!(tallies.count("dev1"), 0);
        assert!(!tallies.counts.contains_key("dev1"));
        assert_eq!(tallies.last_tokens["dev1"], "t3");
    }

    #[test]
    fn test_missing_or_empty_token_never_counts() {
        let mut tallies = Tallies::default();
        apply(&mut tallies, &[snap("dev1", "LED ON", "")]);
        let no_token = DeviceSnapshot {
            name: "dev1".into(),
            last_report: Some("LED ON".into()),
            ..Default::default()
        };
        apply(&mut tallies, &[no_token]);
        assert_eq!(tallies.count("dev1"), 0);
    }

    #[test]
    fn test_token_anchored_without_increment() {
        let mut tallies = Tallies::default();
        // a non-event observation moves the token forward
        apply(&mut tallies, &[snap("dev1", "idle", "t1")]);
        // same token now carries an activation report: still a repeat
        apply(&mut tallies, &[snap("dev1", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev1"), 0);
        assert_eq!(tallies.last_reports["dev1"], "LED ON");
    }

    #[test]
    fn test_at_most_one_increment_per_pass() {
        let mut tallies = Tallies::default();
        apply(
            &mut tallies,
            &[snap("dev1", "LED ON", "t1"), snap("dev1", "LED/BUZZER ON", "t2")],
        );
        assert_eq!(tallies.count("dev1"), 1);
    }

    #[test]
    fn test_absent_devices_are_kept() {
        let mut tallies = Tallies::default();
        apply(&mut tallies, &[snap("dev1", "LED ON", "t1"), snap("dev2", "LED ON", "t1")]);
        apply(&mut tallies, &[snap("dev2", "LED ON", "t2")]);
        assert_eq!(tallies.count("dev1"), 1);
        assert_eq!(tallies.count("dev2"), 2);
        assert_eq!(tallies.last_tokens["dev1"], "t1");

        // dev1 reappears with the token it left with: not a new event
        apply(&mut tallies, &[snap("dev1", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev1"), 1);
        apply(&mut tallies, &[snap("dev1", "LED ON", "t9")]);
        assert_eq!(tallies.count("dev1"), 2);
    }

    #[test]
    fn test_monotonic_over_sequence() {
        let mut tallies = Tallies::default();
        let reports = ["LED ON", "idle", "LED ON", "LED ON", "", "LED 점등"];
        let tokens = ["a", "b", "b", "c", "d", "d"];
        let mut last = 0;
        for (report, token) in reports.iter().zip(tokens) {
            apply(&mut tallies, &[snap("dev1", report, token)]);
            let now = tallies.count("dev1");
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn test_commit_reports_changed_maps() {
        let mut tallies = Tallies::default();
        let changed = apply(&mut tallies, &[snap("dev1", "idle", "t1")]);
        assert_eq!(
            changed,
            Changed {
                counts: false,
                reports: true,
                tokens: true
            }
        );

        let changed = apply(&mut tallies, &[snap("dev1", "LED ON", "t2")]);
        assert!(changed.counts && changed.reports && changed.tokens);
    }

    #[test]
    fn test_counter_saturates() {
        let mut tallies = Tallies::default();
        tallies.counts.insert("dev1".into(), u64::MAX);
        apply(&mut tallies, &[snap("dev1", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev1"), u64::MAX);
    }

    #[test]
    fn test_resets() {
        let mut tallies = Tallies::default();
        apply(&mut tallies, &[snap("dev1", "LED ON", "t1"), snap("dev2", "LED ON", "t1")]);

        tallies.reset_one("dev1");
        assert_eq!(tallies.counts["dev1"], 0);
        assert_eq!(tallies.count("dev2"), 1);

        tallies.reset_all();
        assert!(tallies.counts.is_empty());
        // tokens survive a reset, so the old observation is not recounted
        apply(&mut tallies, &[snap("dev2", "LED ON", "t1")]);
        assert_eq!(tallies.count("dev2"), 0);
    }
}
