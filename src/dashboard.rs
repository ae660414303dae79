use log::{debug, info, warn};

use crate::extractor::EventExtractor;
use crate::messages::DeviceSnapshot;
use crate::reconciler::{self, Changed, Tallies};
use crate::selection::Selection;
use crate::store::{ActivationCounts, CounterPersistence, KeyValueStore};

/// Application state for one monitoring session.
///
/// Owned by the scheduler task and passed explicitly to every mutation, so
/// reconciliation never touches ambient state.
pub struct Dashboard<K> {
    roster: Vec<DeviceSnapshot>,
    tallies: Tallies,
    selection: Selection,
    extractor: EventExtractor,
    persistence: CounterPersistence<K>,
}

/// Read-only copy of the dashboard handed to the console.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub roster: Vec<DeviceSnapshot>,
    pub counts: ActivationCounts,
    pub selected: Option<String>,
}

impl DashboardView {
    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn selected_device(&self) -> Option<&DeviceSnapshot> {
        let name = self.selected.as_deref()?;
        self.roster.iter().find(|d| d.name == name)
    }
}

impl<K: KeyValueStore> Dashboard<K> {
    /// Start a session from whatever counters were persisted before.
    pub fn new(extractor: EventExtractor, persistence: CounterPersistence<K>) -> Self {
        let tallies = Tallies {
            counts: persistence.load(),
            ..Default::default()
        };
        Dashboard {
            roster: Vec::new(),
            tallies,
            selection: Selection::default(),
            extractor,
            persistence,
        }
    }

    /// Replace the roster with a fresh fetch and fold it into the tallies.
    pub fn apply_snapshot(&mut self, snapshots: Vec<DeviceSnapshot>) -> Changed {
        self.roster = snapshots;
        self.selection.retain_live(&self.roster);

        let next = reconciler::reconcile(&self.tallies, &self.roster, &self.extractor);
        let changed = self.tallies.commit(next);
        if changed.counts {
            self.persistence.save(&self.tallies.counts);
        }
        if changed.any() {
            debug!("Reconciled {} devices: {:?}", self.roster.len(), changed);
        }
        changed
    }

    pub fn select(&mut self, name: &str) -> bool {
        let selected = self.selection.select(name, &self.roster);
        if !selected {
            warn!("Cannot select {}: not in the current roster", name);
        }
        selected
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn reset_one(&mut self, name: &str) {
        info!("Resetting counter for {} (was {})", name, self.tallies.count(name));
        self.tallies.reset_one(name);
        self.persistence.save(&self.tallies.counts);
    }

    pub fn reset_all(&mut self) {
        info!("Resetting all counters");
        self.tallies.reset_all();
        self.persistence.save(&self.tallies.counts);
    }

    /// Session teardown. The selection goes first.
    pub fn end_session(&mut self) {
        self.selection.clear();
    }

    pub fn roster(&self) -> &[DeviceSnapshot] {
        &self.roster
    }

    pub fn tallies(&self) -> &Tallies {
        &self.tallies
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.get()
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            roster: self.roster.clone(),
            counts: self.tallies.counts.clone(),
            selected: self.selection().map(str::to_string),
        }
    }
}
