//! Slice window bookkeeping: what history survives into the next slice.
//!
//! Slices overlap. History older than `remove_before` is dropped, history
//! from the join threshold on is recomputed from the new slice's input.

use crate::{target::TargetReferences, types::TargetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SliceWindow {
    pub first_slice: bool,
    pub last_slice: bool,
    /// History before this is discarded
    pub remove_before: f64,
    /// Begin of the new data in this slice
    pub slice_begin: f64,
    pub next_slice_begin: f64,
}

impl SliceWindow {
    /// Window of the first slice of a session.
    pub fn first(slice_begin: f64, next_slice_begin: f64) -> Self {
        Self {
            first_slice: true,
            last_slice: false,
            remove_before: slice_begin,
            slice_begin,
            next_slice_begin,
        }
    }

    /// Window of a following slice.
    pub fn next(remove_before: f64, slice_begin: f64, next_slice_begin: f64) -> Self {
        Self {
            first_slice: false,
            last_slice: false,
            remove_before,
            slice_begin,
            next_slice_begin,
        }
    }

    pub fn with_last(mut self, last_slice: bool) -> Self {
        self.last_slice = last_slice;
        self
    }

    /// Boundary between retained history and newly filtered data.
    pub fn join_threshold(&self) -> f64 {
        self.remove_before + (self.slice_begin - self.remove_before) / 2.0
    }
}

/// Outcome of preparing the working sets for a slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Targets dropped because they are no longer live
    pub removed_targets: usize,
    /// Updates discarded from the retained history
    pub purged_updates: usize,
}

/// Bring the per-target working sets to the start of `window`.
///
/// On the first slice all history is discarded; otherwise history outside
/// `[remove_before, join_threshold)` is purged and targets not reported live
/// are removed.
pub fn prepare_targets(
    targets: &mut BTreeMap<TargetId, TargetReferences>,
    window: &SliceWindow,
    is_live: impl Fn(TargetId) -> bool,
) -> PurgeSummary {
    let mut summary = PurgeSummary::default();

    if window.first_slice {
        summary.removed_targets = targets.len();
        targets.clear();
        return summary;
    }

    let before = targets.len();
    targets.retain(|id, _| is_live(*id));
    summary.removed_targets = before - targets.len();

    let join = window.join_threshold();
    for refs in targets.values_mut() {
        let n = refs.updates.len();
        refs.purge_history(window.remove_before, join);
        summary.purged_updates += n - refs.updates.len();
        refs.reset_slice_data();
    }

    debug!(
        remove_before = window.remove_before,
        join_threshold = join,
        removed_targets = summary.removed_targets,
        purged_updates = summary.purged_updates,
        "prepared slice"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KalmanUpdate, StateCov, StateVec};

    fn refs_with_updates(id: u32, times: &[f64]) -> TargetReferences {
        let mut refs = TargetReferences::new(TargetId(id));
        refs.updates = times
            .iter()
            .map(|&t| KalmanUpdate::new(t, StateVec::zeros(), StateCov::identity()))
            .collect();
        refs
    }

    #[test]
    fn join_threshold_is_midpoint() {
        let w = SliceWindow::next(100.0, 200.0, 300.0);
        assert_eq!(w.join_threshold(), 150.0);
        assert_eq!(SliceWindow::first(0.0, 60.0).join_threshold(), 0.0);
    }

    #[test]
    fn first_slice_discards_everything() {
        let mut targets = BTreeMap::new();
        targets.insert(TargetId(1), refs_with_updates(1, &[1.0, 2.0]));
        let summary = prepare_targets(&mut targets, &SliceWindow::first(0.0, 10.0), |_| true);
        assert!(targets.is_empty());
        assert_eq!(summary.removed_targets, 1);
    }

    #[test]
    fn purges_outside_window_and_dead_targets() {
        let mut targets = BTreeMap::new();
        targets.insert(TargetId(1), refs_with_updates(1, &[5.0, 10.0, 14.0, 15.0, 18.0]));
        targets.insert(TargetId(2), refs_with_updates(2, &[12.0]));
        targets.get_mut(&TargetId(1)).unwrap().counts.num_updates = 4;

        let window = SliceWindow::next(10.0, 20.0, 30.0);
        let summary = prepare_targets(&mut targets, &window, |id| id == TargetId(1));

        assert_eq!(summary.removed_targets, 1);
        assert_eq!(summary.purged_updates, 3);
        let refs = &targets[&TargetId(1)];
        let times: Vec<f64> = refs.updates.iter().map(|u| u.t).collect();
        assert_eq!(times, vec![10.0, 14.0]);
        assert_eq!(refs.counts.num_updates, 0);
    }

    #[test]
    fn missing_targets_are_not_an_error() {
        let mut targets = BTreeMap::new();
        let summary = prepare_targets(&mut targets, &SliceWindow::next(0.0, 10.0, 20.0), |_| false);
        assert_eq!(summary, PurgeSummary::default());
    }
}
