//! The scheduler's work graph: unit registry, the three work lists, and the
//! reverse-dependency cache.
//!
//! Everything here is mutated only between frames (behind the scheduler's
//! `&mut` methods or its write lock). During a frame the graph is read-only;
//! the only mutable per-frame datum is each unit's running-state word, which
//! the scan helpers read through acquire loads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::key::WorkUnitKey;
use crate::monopoly::Monopoly;
use crate::registry::Registry;
use crate::unit::{RunningState, UnitId, UnitRecord, Work};

type DependentMap = BTreeMap<UnitId, BTreeSet<UnitId>>;

/// Freshly sorted copies of both lists, produced by a background sorter and
/// installed at the next frame boundary.
#[derive(Debug)]
pub(crate) struct SortedLists {
    pub(crate) main: Vec<WorkUnitKey>,
    pub(crate) affinity: Vec<WorkUnitKey>,
}

#[derive(Debug, Default)]
pub(crate) struct WorkGraph {
    units: Registry,
    main: Vec<WorkUnitKey>,
    affinity: Vec<WorkUnitKey>,
    monopolies: Vec<Box<dyn Monopoly>>,
    dependents: DependentMap,
}

impl WorkGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // ── Registration ────────────────────────────────────────────────────

    pub(crate) fn add_work(&mut self, body: Box<dyn Work>) -> UnitId {
        let id = self.units.insert(UnitRecord::new(body));
        let key = self.sorting_key(id);
        self.main.push(key);
        id
    }

    pub(crate) fn add_work_affinity(&mut self, body: Box<dyn Work>) -> UnitId {
        let id = self.units.insert(UnitRecord::new(body));
        let key = self.sorting_key(id);
        self.affinity.push(key);
        id
    }

    pub(crate) fn add_monopoly(&mut self, monopoly: Box<dyn Monopoly>) {
        self.monopolies.push(monopoly);
    }

    /// Removes a unit from whichever list holds it and returns its body.
    ///
    /// Dependency edges on surviving units are left alone; cleaning them up
    /// is the caller's responsibility.
    pub(crate) fn remove_work(&mut self, id: UnitId) -> Option<Box<dyn Work>> {
        let record = self.units.remove(id)?;
        self.main.retain(|key| key.unit != id);
        self.affinity.retain(|key| key.unit != id);
        self.dependents.remove(&id);
        for dependents in self.dependents.values_mut() {
            dependents.remove(&id);
        }
        Some(record.into_body())
    }

    pub(crate) fn unit(&self, id: UnitId) -> Option<&UnitRecord> {
        self.units.get(id)
    }

    pub(crate) fn unit_mut(&mut self, id: UnitId) -> Option<&mut UnitRecord> {
        self.units.get_mut(id)
    }

    pub(crate) fn units(&self) -> &Registry {
        &self.units
    }

    pub(crate) fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn take_monopolies(&mut self) -> Vec<Box<dyn Monopoly>> {
        std::mem::take(&mut self.monopolies)
    }

    pub(crate) fn put_monopolies(&mut self, monopolies: Vec<Box<dyn Monopoly>>) {
        debug_assert!(self.monopolies.is_empty(), "monopolies restored twice");
        self.monopolies = monopolies;
    }

    // ── Dependent graph ─────────────────────────────────────────────────

    /// Builds the reverse-edge map from the forward dependency lists of both
    /// work lists.
    fn build_dependent_map(&self) -> DependentMap {
        let mut map = DependentMap::new();
        for key in self.main.iter().chain(&self.affinity) {
            if let Some(record) = self.units.get(key.unit) {
                for dependency in record.dependencies() {
                    map.entry(*dependency).or_default().insert(key.unit);
                }
            }
        }
        map
    }

    /// Recomputes the cached reverse-dependency graph.
    pub(crate) fn update_dependent_graph(&mut self) {
        self.dependents = self.build_dependent_map();
    }

    /// Transitive count of units that must wait for `unit`, from the cached
    /// graph. Diamonds are counted once per path, matching the sort
    /// heuristic's bias toward heavily depended-on units.
    pub(crate) fn dependent_count_of(&self, unit: UnitId) -> usize {
        transitive_dependents(&self.dependents, unit, unit)
    }

    /// Transitive count of units `unit` waits for, from the forward lists.
    pub(crate) fn dependency_count_of(&self, unit: UnitId) -> usize {
        self.transitive_dependencies(unit, unit)
    }

    fn transitive_dependencies(&self, unit: UnitId, origin: UnitId) -> usize {
        let Some(record) = self.units.get(unit) else {
            return 0;
        };
        let mut count = record.dependencies().len();
        for dependency in record.dependencies() {
            debug_assert_ne!(*dependency, origin, "dependency cycle through {origin:?}");
            count += self.transitive_dependencies(*dependency, origin);
        }
        count
    }

    // ── Sorting ─────────────────────────────────────────────────────────

    /// The current sort key for a unit, from the cached dependent graph and
    /// the unit's rolling average.
    pub(crate) fn sorting_key(&self, unit: UnitId) -> WorkUnitKey {
        let average = self.units.get(unit).map_or(0, UnitRecord::average_micros);
        WorkUnitKey::new(self.dependent_count_of(unit), average, unit)
    }

    /// Refreshes every key in the main list and sorts it ascending.
    pub(crate) fn sort_main(&mut self, update_dependent_graph: bool) {
        if self.main.is_empty() {
            return;
        }
        if update_dependent_graph {
            self.update_dependent_graph();
        }
        let mut list = std::mem::take(&mut self.main);
        self.refresh_and_sort(&mut list);
        self.main = list;
    }

    /// Refreshes every key in the affinity list and sorts it ascending,
    /// bounded by the affinity list's own endpoints.
    pub(crate) fn sort_affinity(&mut self, update_dependent_graph: bool) {
        if self.affinity.is_empty() {
            return;
        }
        if update_dependent_graph {
            self.update_dependent_graph();
        }
        let mut list = std::mem::take(&mut self.affinity);
        self.refresh_and_sort(&mut list);
        self.affinity = list;
    }

    /// Sorts both lists, refreshing the dependent graph at most once.
    pub(crate) fn sort_all(&mut self, update_dependent_graph: bool) {
        if update_dependent_graph {
            self.update_dependent_graph();
        }
        self.sort_affinity(false);
        self.sort_main(false);
    }

    fn refresh_and_sort(&self, list: &mut [WorkUnitKey]) {
        for key in list.iter_mut() {
            *key = self.sorting_key(key.unit);
        }
        list.sort();
    }

    /// Builds freshly sorted copies of both lists without touching the
    /// cached graph, for the background sorter running inside a frame.
    pub(crate) fn prepare_sorted(&self) -> SortedLists {
        let dependents = self.build_dependent_map();
        let rebuild = |list: &[WorkUnitKey]| {
            let mut keys: Vec<WorkUnitKey> = list
                .iter()
                .map(|key| {
                    let average = self.units.get(key.unit).map_or(0, UnitRecord::average_micros);
                    WorkUnitKey::new(
                        transitive_dependents(&dependents, key.unit, key.unit),
                        average,
                        key.unit,
                    )
                })
                .collect();
            keys.sort();
            keys
        };
        SortedLists {
            main: rebuild(&self.main),
            affinity: rebuild(&self.affinity),
        }
    }

    /// Replaces both lists with sorter output.
    pub(crate) fn install(&mut self, lists: SortedLists) {
        self.main = lists.main;
        self.affinity = lists.affinity;
    }

    // ── Work pulling ────────────────────────────────────────────────────

    /// Scans the shared pool from highest priority down for a unit that is
    /// `NotStarted` with every dependency `Complete`.
    pub(crate) fn next_work_unit(&self, decache_main: &AtomicUsize) -> Option<UnitId> {
        self.scan(&self.main, decache_main)
    }

    /// Scans the affinity list first, falling through to the shared pool.
    pub(crate) fn next_work_unit_affinity(
        &self,
        decache_affinity: &AtomicUsize,
        decache_main: &AtomicUsize,
    ) -> Option<UnitId> {
        self.scan(&self.affinity, decache_affinity)
            .or_else(|| self.scan(&self.main, decache_main))
    }

    /// True iff every unit in both lists reports `Complete`; the frame
    /// termination condition.
    pub(crate) fn all_work_complete(&self) -> bool {
        self.main
            .iter()
            .chain(&self.affinity)
            .all(|key| match self.units.get(key.unit) {
                Some(record) => record.running_state() == RunningState::Complete,
                None => true,
            })
    }

    /// Rearms every registered unit for the next frame.
    pub(crate) fn reset_all_units(&self) {
        for (_, record) in self.units.iter() {
            record.prepare_for_next_frame();
        }
    }

    fn scan(&self, list: &[WorkUnitKey], decache: &AtomicUsize) -> Option<UnitId> {
        let len = list.len();
        if len == 0 {
            return None;
        }

        #[cfg(feature = "decache")]
        let skip = decache.load(Ordering::Acquire).min(len);
        #[cfg(not(feature = "decache"))]
        let skip = {
            let _ = decache;
            0
        };

        // `observed` tracks the contiguous run of Complete units at the
        // high-priority end; it may only grow within a frame, so publishing
        // it with fetch_max keeps the hint a scan shortcut and nothing more.
        let mut observed = skip;
        let mut contiguous = true;
        let mut found = None;
        for key in list[..len - skip].iter().rev() {
            let Some(record) = self.units.get(key.unit) else {
                continue;
            };
            match record.running_state() {
                RunningState::Complete => {
                    if contiguous {
                        observed += 1;
                    }
                }
                RunningState::Running => {
                    contiguous = false;
                }
                RunningState::NotStarted => {
                    contiguous = false;
                    if record.is_every_dependency_complete(&self.units) {
                        found = Some(key.unit);
                        break;
                    }
                }
            }
        }

        #[cfg(feature = "decache")]
        if observed > skip {
            decache.fetch_max(observed, Ordering::AcqRel);
        }
        #[cfg(not(feature = "decache"))]
        let _ = observed;

        found
    }
}

fn transitive_dependents(map: &DependentMap, unit: UnitId, origin: UnitId) -> usize {
    let Some(direct) = map.get(&unit) else {
        return 0;
    };
    let mut count = direct.len();
    for dependent in direct {
        debug_assert_ne!(*dependent, origin, "dependency cycle through {origin:?}");
        count += transitive_dependents(map, *dependent, origin);
    }
    count
}
