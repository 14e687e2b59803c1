//! Uniform time resampling of a finished update sequence.

use crate::{
    annotations::{Annotation, Stage},
    estimator::Estimator,
    target::TargetReferences,
    types::KalmanUpdate,
};
use tracing::trace;

/// Resample `updates` with `estimator`, counting samples that failed.
pub fn resample_target(
    refs: &mut TargetReferences,
    estimator: &dyn Estimator,
    updates: &[KalmanUpdate],
) -> Vec<KalmanUpdate> {
    let (resampled, failed) = estimator.interp_updates(updates);
    refs.counts.num_interp_steps_failed += failed as u64;
    trace!(
        target_id = %refs.id,
        input = updates.len(),
        output = resampled.len(),
        failed,
        "resampled updates"
    );

    if refs.annotations.is_some() {
        let updates = resampled.clone();
        refs.annotate(|| Annotation::Updates {
            stage: Stage::Resampled,
            updates,
        });
    }
    resampled
}
