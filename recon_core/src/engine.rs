//! Per-target filter state machine: preprocess, initialize or resume, step.

use crate::{
    annotations::{Annotation, Stage},
    config::{DebugSettings, ReferenceCalculatorSettings},
    estimator::{Estimator, StepOutcome},
    interp::MeasurementInterpolator,
    slice::SliceWindow,
    target::TargetReferences,
    types::sort_measurements,
};
use tracing::{info, trace, warn};

/// How the filter was brought up for this slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// No input this slice
    NoMeasurements,
    /// All input lies before the join threshold
    NoStartIndex,
    /// Filter initialized; step from measurement `first_step` on
    Ready { first_step: usize },
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Move pending stream buffers into the filter input, resampling the
/// content types configured for it.
pub fn preprocess_measurements(
    refs: &mut TargetReferences,
    settings: &ReferenceCalculatorSettings,
    interpolator: &dyn MeasurementInterpolator,
) {
    for (key, mut mms) in std::mem::take(&mut refs.pending) {
        if let Some(options) = settings.measurement_resampling.get(&key.content_id) {
            sort_measurements(&mut mms);
            let resampled = interpolator.interpolate(&mms, options);
            if resampled.is_empty() {
                trace!(target_id = %refs.id, ?key, "resampling produced nothing, keeping input");
            } else {
                trace!(
                    target_id = %refs.id,
                    ?key,
                    before = mms.len(),
                    after = resampled.len(),
                    "resampled stream"
                );
                mms = resampled;
            }
        }
        for mm in mms {
            refs.add_measurement(mm);
        }
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Sort the input and initialize the estimator, either cold from the first
/// new measurement or from the last retained update.
///
/// # Panics
/// If the retained update is younger than the first new measurement.
pub fn init_reconstruction(
    refs: &mut TargetReferences,
    estimator: &mut dyn Estimator,
    window: &SliceWindow,
    debug: bool,
) -> InitOutcome {
    if refs.measurements.is_empty() {
        return InitOutcome::NoMeasurements;
    }
    sort_measurements(&mut refs.measurements);

    let start = if window.first_slice {
        0
    } else {
        let join = window.join_threshold();
        match refs.measurements.iter().position(|mm| mm.t >= join) {
            Some(idx) => idx,
            None => return InitOutcome::NoStartIndex,
        }
    };
    refs.start_index = Some(start);

    let resume_from = if window.first_slice {
        None
    } else {
        refs.updates.last().cloned()
    };

    match resume_from {
        Some(last) => {
            let first_new = &refs.measurements[start];
            assert!(
                last.t <= first_new.t,
                "target {}: retained update at t={} is newer than first new measurement at t={}",
                refs.id,
                last.t,
                first_new.t
            );
            estimator.init_from_update(&last);
            refs.init_update = Some(last);
            InitOutcome::Ready { first_step: start }
        }
        None => {
            let mm = refs.measurements[start].clone();
            let update = estimator.init_from_measurement(&mm);
            refs.push_update(update, &mm, debug);
            InitOutcome::Ready {
                first_step: start + 1,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stepping
// ---------------------------------------------------------------------------

/// Step the estimator over `measurements[first_step..]`, collecting accepted
/// updates and counting outcomes.
pub fn step_measurements(
    refs: &mut TargetReferences,
    estimator: &mut dyn Estimator,
    first_step: usize,
    debug: bool,
    selectors: &DebugSettings,
) {
    let measurements = std::mem::take(&mut refs.measurements);

    for mm in measurements.iter().skip(first_step) {
        if mm.corrected {
            refs.counts.num_updates_ccoeff_corr += 1;
        }
        let position_before = estimator.current_position();

        if selectors.debug_measurement(debug, mm.source_id, mm.t) {
            info!(
                target_id = %refs.id,
                source = ?mm.source_id,
                t = mm.t,
                x = mm.x,
                y = mm.y,
                interpolated = mm.interpolated,
                "stepping debug measurement"
            );
        }

        match estimator.step(mm) {
            StepOutcome::Success {
                update,
                reinit_after_fail,
            } => {
                refs.counts.num_updates_valid += 1;
                if let Some(cause) = reinit_after_fail {
                    refs.counts.record_reinit_after_fail(cause);
                    trace!(target_id = %refs.id, t = mm.t, %cause, "reinit after failed step");
                }
                if update.valid {
                    refs.push_update(update, mm, debug);
                }
            }
            StepOutcome::SkippedStepTooSmall => {
                refs.counts.num_updates_skipped += 1;
                trace!(target_id = %refs.id, t = mm.t, "step too small, skipped");
                if let Some(position) = position_before {
                    refs.annotate(|| Annotation::SkippedStep { t: mm.t, position });
                }
            }
            StepOutcome::Failed(cause) => {
                refs.counts.record_failure(cause);
                warn!(target_id = %refs.id, t = mm.t, %cause, "filter step failed");
                if let Some(position) = position_before {
                    refs.annotate(|| Annotation::FailedStep {
                        t: mm.t,
                        position,
                        cause,
                    });
                }
            }
        }
        refs.counts.num_updates += 1;
    }

    refs.annotate(|| Annotation::Measurements {
        measurements: measurements.clone(),
    });
    refs.measurements = measurements;

    if refs.annotations.is_some() {
        let updates = refs.updates.clone();
        refs.annotate(|| Annotation::Updates {
            stage: Stage::Updates,
            updates,
        });
    }
}
