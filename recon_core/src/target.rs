//! Target entities and their per-slice reconstruction working sets.

use crate::{
    annotations::{Annotation, AnnotationSink},
    stats::UpdateCounts,
    types::{KalmanUpdate, Measurement, Reference, SourceId, StreamKey, TargetId, TimeKey},
};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Target entity
// ---------------------------------------------------------------------------

/// A tracked target: its report streams and its published references.
#[derive(Clone, Debug, Default)]
pub struct ReconTarget {
    pub id: TargetId,
    /// Measurements of the current slice per report stream
    pub streams: BTreeMap<StreamKey, Vec<Measurement>>,
    /// Published trajectory keyed by time
    pub references: BTreeMap<TimeKey, Reference>,
}

impl ReconTarget {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn add_measurement(&mut self, stream: StreamKey, mm: Measurement) {
        self.streams.entry(stream).or_default().push(mm);
    }

    pub fn num_measurements(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }

    /// Replace the published trajectory from the first new timestamp on.
    pub fn publish_references(&mut self, references: &[Reference]) {
        let Some(first) = references.iter().map(|r| r.t).min_by(f64::total_cmp) else {
            return;
        };
        self.references.retain(|t, _| t.0 < first);
        for r in references {
            self.references.insert(r.time_key(), r.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Working set
// ---------------------------------------------------------------------------

/// Originating measurement of an accepted update (debug only).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputInfo {
    pub position: (f64, f64),
    pub interpolated: bool,
}

/// Reconstruction state of one target, owned by one worker during a slice.
#[derive(Default)]
pub struct TargetReferences {
    pub id: TargetId,
    /// Raw per-stream input collected for the slice
    pub pending: Vec<(StreamKey, Vec<Measurement>)>,
    /// Filter input of the slice
    pub measurements: Vec<Measurement>,
    /// Filter output over the retained history
    pub updates: Vec<KalmanUpdate>,
    /// Smoothed counterpart of `updates`
    pub updates_smooth: Vec<KalmanUpdate>,
    /// First measurement at or after the join threshold
    pub start_index: Option<usize>,
    /// Retained update the filter resumed from
    pub init_update: Option<KalmanUpdate>,
    pub input_infos: BTreeMap<(SourceId, TimeKey), InputInfo>,
    pub counts: UpdateCounts,
    /// Output of the slice, cleared once published
    pub references: Vec<Reference>,
    pub annotations: Option<Box<dyn AnnotationSink>>,
}

impl TargetReferences {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Add a filter input measurement.
    ///
    /// # Panics
    /// If the measurement has no source id.
    pub fn add_measurement(&mut self, mm: Measurement) {
        assert!(
            mm.source_id.is_some(),
            "measurement at t={} for target {} has no source id",
            mm.t,
            self.id
        );
        self.measurements.push(mm);
    }

    /// Append an accepted update produced from `mm`.
    pub fn push_update(&mut self, mut update: KalmanUpdate, mm: &Measurement, debug: bool) {
        update.q_var_interp = mm.q_var_interp;
        if debug {
            if let Some(key) = mm.unique_id() {
                self.input_infos.insert(
                    key,
                    InputInfo {
                        position: (mm.x, mm.y),
                        interpolated: mm.interpolated,
                    },
                );
            }
        }
        self.updates.push(update);
    }

    pub fn annotate(&mut self, annotation: impl FnOnce() -> Annotation) {
        if let Some(sink) = self.annotations.as_mut() {
            sink.record(annotation());
        }
    }

    /// Clear slice-local data; retained history stays.
    pub fn reset_slice_data(&mut self) {
        self.pending.clear();
        self.measurements.clear();
        self.references.clear();
        self.start_index = None;
        self.init_update = None;
        self.counts = UpdateCounts::default();
    }

    /// Keep history in `[remove_before, join_threshold)` only.
    pub fn purge_history(&mut self, remove_before: f64, join_threshold: f64) {
        let keep = |t: f64| t >= remove_before && t < join_threshold;
        self.updates.retain(|u| keep(u.t));
        self.updates_smooth.retain(|u| keep(u.t));
        self.input_infos.retain(|(_, t), _| keep(t.0));
    }

    /// Sequence handed to storage when nothing new was filtered.
    pub fn carried_over(&self, smoothed: bool) -> &[KalmanUpdate] {
        if smoothed {
            &self.updates_smooth
        } else {
            &self.updates
        }
    }
}
