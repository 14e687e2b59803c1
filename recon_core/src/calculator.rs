//! Reference calculator: per-slice orchestration of the reconstruction.
//!
//! # Processing steps per slice
//! 1. Reset per-slice data, honor `max_slice_index`
//! 2. Collect each live target's report streams into its working set
//! 3. Fan out one task per target (rayon when multithreading):
//!    preprocess → init → step → smooth → resample → store
//! 4. Barrier, then publish references and fold counters sequentially

use crate::{
    annotations::{Annotation, AnnotationFactory},
    config::ReferenceCalculatorSettings,
    engine::{init_reconstruction, preprocess_measurements, step_measurements, InitOutcome},
    error::ConfigError,
    estimator::{EstimatorFactory, KalmanEstimatorFactory},
    interp::{LinearInterpolator, MeasurementInterpolator},
    resample::resample_target,
    slice::{prepare_targets, SliceWindow},
    smoothing::smooth_target,
    stats::ReconstructionStats,
    target::{ReconTarget, TargetReferences},
    types::{KalmanUpdate, TargetId},
};
use rayon::prelude::*;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tracing::{debug, info};

/// Shared, read-only inputs of one per-target task.
struct TaskContext<'a> {
    settings: &'a ReferenceCalculatorSettings,
    estimators: &'a dyn EstimatorFactory,
    interpolator: &'a dyn MeasurementInterpolator,
    window: &'a SliceWindow,
}

/// Incrementally reconstructs reference trajectories slice by slice.
pub struct ReferenceCalculator {
    settings: ReferenceCalculatorSettings,
    estimators: Arc<dyn EstimatorFactory>,
    interpolator: Arc<dyn MeasurementInterpolator>,
    annotation_factory: Option<Arc<dyn AnnotationFactory>>,
    references: BTreeMap<TargetId, TargetReferences>,
    window: Option<SliceWindow>,
    slice_idx: usize,
}

impl ReferenceCalculator {
    /// Calculator with the Kalman estimator and linear interpolator.
    pub fn new(settings: ReferenceCalculatorSettings) -> Result<Self, ConfigError> {
        let estimators = Arc::new(KalmanEstimatorFactory::new(settings.estimator.clone()));
        Self::with_collaborators(settings, estimators, Arc::new(LinearInterpolator))
    }

    pub fn with_collaborators(
        settings: ReferenceCalculatorSettings,
        estimators: Arc<dyn EstimatorFactory>,
        interpolator: Arc<dyn MeasurementInterpolator>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            estimators,
            interpolator,
            annotation_factory: None,
            references: BTreeMap::new(),
            window: None,
            slice_idx: 0,
        })
    }

    /// Record annotations for the targets selected in the debug settings.
    pub fn with_annotations(mut self, factory: Arc<dyn AnnotationFactory>) -> Self {
        self.annotation_factory = Some(factory);
        self
    }

    pub fn settings(&self) -> &ReferenceCalculatorSettings {
        &self.settings
    }

    pub fn slice_index(&self) -> usize {
        self.slice_idx
    }

    /// Working set of a target, if it has one.
    pub fn target_references(&self, id: TargetId) -> Option<&TargetReferences> {
        self.references.get(&id)
    }

    /// Start a new session.
    pub fn reset(&mut self) {
        self.references.clear();
        self.window = None;
        self.slice_idx = 0;
    }

    /// Bring per-target state to the start of `window`.
    pub fn prepare_for_next_slice(
        &mut self,
        window: SliceWindow,
        targets: &BTreeMap<TargetId, ReconTarget>,
    ) {
        let summary = prepare_targets(&mut self.references, &window, |id| {
            targets.contains_key(&id)
        });
        if window.first_slice {
            self.slice_idx = 0;
        } else {
            self.slice_idx += 1;
        }
        info!(
            slice = self.slice_idx,
            slice_begin = window.slice_begin,
            join_threshold = window.join_threshold(),
            removed_targets = summary.removed_targets,
            "prepared slice"
        );
        self.window = Some(window);
    }

    /// Reconstruct every target of the current slice and publish the
    /// results into `targets`.
    ///
    /// # Panics
    /// If a working set has no counterpart in `targets` at publication.
    pub fn compute_references(
        &mut self,
        targets: &mut BTreeMap<TargetId, ReconTarget>,
    ) -> ReconstructionStats {
        let start_total = Instant::now();
        let mut stats = ReconstructionStats::default();

        // ----------------------------------------------------------------
        // Step 1: reset per-slice data
        // ----------------------------------------------------------------
        for refs in self.references.values_mut() {
            refs.reset_slice_data();
        }
        if let Some(max) = self.settings.max_slice_index {
            if self.slice_idx > max {
                info!(slice = self.slice_idx, max, "slice index past limit, skipping");
                return stats;
            }
        }
        let window = self
            .window
            .unwrap_or_else(|| SliceWindow::first(f64::NEG_INFINITY, f64::INFINITY));

        // ----------------------------------------------------------------
        // Step 2: collect input per live target
        // ----------------------------------------------------------------
        for (id, target) in targets.iter() {
            let refs = self
                .references
                .entry(*id)
                .or_insert_with(|| TargetReferences::new(*id));

            for (key, mms) in &target.streams {
                if self.settings.uses_content_type(key.content_id) && !mms.is_empty() {
                    refs.pending.push((*key, mms.clone()));
                }
            }

            if refs.annotations.is_none() && self.settings.debug.debug_target(*id) {
                if let Some(factory) = &self.annotation_factory {
                    refs.annotations = Some(factory.create(*id));
                }
            }
        }

        // ----------------------------------------------------------------
        // Step 3: per-target reconstruction
        // ----------------------------------------------------------------
        let t0 = Instant::now();
        let ctx = TaskContext {
            settings: &self.settings,
            estimators: self.estimators.as_ref(),
            interpolator: self.interpolator.as_ref(),
            window: &window,
        };
        if self.settings.multithreading {
            self.references
                .par_iter_mut()
                .for_each(|(_, refs)| reconstruct_target(refs, &ctx));
        } else {
            self.references
                .iter_mut()
                .for_each(|(_, refs)| reconstruct_target(refs, &ctx));
        }
        let reconstruct_us = t0.elapsed().as_micros() as u64;

        // ----------------------------------------------------------------
        // Step 4: publish and fold stats
        // ----------------------------------------------------------------
        for (id, refs) in self.references.iter_mut() {
            let target = targets
                .get_mut(id)
                .unwrap_or_else(|| panic!("target {id} missing at publication"));

            target.publish_references(&refs.references);
            stats.num_targets += 1;
            stats.num_measurements += refs.measurements.len() as u64;
            stats.num_references += refs.references.len() as u64;
            stats.counts += refs.counts;
            refs.references.clear();
        }
        stats.num_slices = 1;

        info!(
            slice = self.slice_idx,
            targets = stats.num_targets,
            measurements = stats.num_measurements,
            references = stats.num_references,
            failed = stats.counts.num_updates_failed,
            skipped = stats.counts.num_updates_skipped,
            reconstruct_us,
            total_us = start_total.elapsed().as_micros() as u64,
            "computed references"
        );
        stats
    }

    /// Hand out what the annotation sinks recorded so far.
    pub fn take_annotations(&mut self) -> BTreeMap<TargetId, Vec<Annotation>> {
        self.references
            .iter_mut()
            .filter_map(|(id, refs)| {
                let drained = refs.annotations.as_mut()?.drain();
                Some((*id, drained))
            })
            .collect()
    }
}

/// Full reconstruction of one target for the current slice.
fn reconstruct_target(refs: &mut TargetReferences, ctx: &TaskContext<'_>) {
    let settings = ctx.settings;
    let debug_target = settings.debug.debug_target(refs.id);

    preprocess_measurements(refs, settings, ctx.interpolator);

    let mut estimator = ctx.estimators.create(settings.filter_kind);
    let n_before = refs.updates.len();

    let final_updates = match init_reconstruction(
        refs,
        estimator.as_mut(),
        ctx.window,
        debug_target,
    ) {
        InitOutcome::NoMeasurements | InitOutcome::NoStartIndex => {
            debug!(target_id = %refs.id, carried = n_before, "nothing new to filter");
            if n_before == 0 {
                return;
            }
            refs.carried_over(settings.smooth_rts).to_vec()
        }
        InitOutcome::Ready { first_step } => {
            step_measurements(
                refs,
                estimator.as_mut(),
                first_step,
                debug_target,
                &settings.debug,
            );
            if settings.smooth_rts {
                smooth_target(refs, estimator.as_ref(), n_before);
                refs.updates_smooth.clone()
            } else {
                refs.updates.clone()
            }
        }
    };

    let final_updates = if settings.resample_result {
        let resampler = ctx.estimators.create(settings.filter_kind.resample_kind());
        resample_target(refs, resampler.as_ref(), &final_updates)
    } else {
        final_updates
    };

    refs.references = estimator.store_updates(&final_updates);

    debug!(
        target_id = %refs.id,
        measurements = refs.measurements.len(),
        updates = refs.updates.len(),
        references = refs.references.len(),
        valid = refs.counts.num_updates_valid,
        failed = refs.counts.num_updates_failed,
        skipped = refs.counts.num_updates_skipped,
        "reconstructed target"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
