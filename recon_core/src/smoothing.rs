//! Backward smoothing of a target's joined update sequence.

use crate::{
    annotations::{Annotation, Stage},
    config::SmoothFailStrategy,
    estimator::Estimator,
    target::TargetReferences,
};
use tracing::{debug, warn};

/// Smooth the full `updates` sequence and append the entries beyond the
/// `n_before` carried-over ones to `updates_smooth`.
///
/// Falls back to the unsmoothed updates if the pass fails as a whole;
/// smoothed samples marked invalid are dropped.
pub fn smooth_target(refs: &mut TargetReferences, estimator: &dyn Estimator, n_before: usize) {
    let mut smoothed = refs.updates.clone();
    if let Err(cause) = estimator.smooth_updates(&mut smoothed, SmoothFailStrategy::SetInvalid) {
        warn!(target_id = %refs.id, %cause, "smoothing failed, using unsmoothed updates");
        refs.counts.num_smoothing_failed += 1;
        smoothed = refs.updates.clone();
    }

    let mut dropped = 0;
    for update in smoothed.into_iter().skip(n_before) {
        if update.valid {
            refs.updates_smooth.push(update);
        } else {
            dropped += 1;
        }
    }
    refs.counts.num_smooth_steps_failed += dropped;

    debug!(
        target_id = %refs.id,
        smoothed = refs.updates_smooth.len(),
        dropped,
        "smoothed updates"
    );

    if refs.annotations.is_some() {
        let updates = refs.updates_smooth.clone();
        refs.annotate(|| Annotation::Updates {
            stage: Stage::Smoothed,
            updates,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::KalmanError,
        estimator::StepOutcome,
        types::{KalmanUpdate, Measurement, StateCov, StateVec, TargetId},
    };

    /// Smoother that marks one index invalid, or fails outright.
    struct FakeSmoother {
        invalid_at: Option<usize>,
        fail: bool,
    }

    impl Estimator for FakeSmoother {
        fn init_from_measurement(&mut self, mm: &Measurement) -> KalmanUpdate {
            KalmanUpdate::new(mm.t, StateVec::zeros(), StateCov::identity())
        }
        fn init_from_update(&mut self, _update: &KalmanUpdate) {}
        fn step(&mut self, _mm: &Measurement) -> StepOutcome {
            StepOutcome::Failed(KalmanError::Other)
        }
        fn smooth_updates(
            &self,
            updates: &mut [KalmanUpdate],
            _strategy: SmoothFailStrategy,
        ) -> Result<(), KalmanError> {
            if self.fail {
                return Err(KalmanError::Numeric);
            }
            for u in updates.iter_mut() {
                u.state[0] += 1.0;
            }
            if let Some(i) = self.invalid_at {
                updates[i].valid = false;
            }
            Ok(())
        }
        fn interp_updates(&self, updates: &[KalmanUpdate]) -> (Vec<KalmanUpdate>, usize) {
            (updates.to_vec(), 0)
        }
        fn current_position(&self) -> Option<(f64, f64)> {
            None
        }
    }

    fn refs_with(n: usize) -> TargetReferences {
        let mut refs = TargetReferences::new(TargetId(1));
        refs.updates = (0..n)
            .map(|t| KalmanUpdate::new(t as f64, StateVec::zeros(), StateCov::identity()))
            .collect();
        refs
    }

    #[test]
    fn invalid_smoothed_sample_is_dropped() {
        let mut refs = refs_with(5);
        let est = FakeSmoother {
            invalid_at: Some(2),
            fail: false,
        };
        smooth_target(&mut refs, &est, 0);

        assert_eq!(refs.updates_smooth.len(), 4);
        assert_eq!(refs.counts.num_smooth_steps_failed, 1);
        assert_eq!(refs.counts.num_smoothing_failed, 0);
        assert!(refs.updates_smooth.iter().all(|u| u.state[0] == 1.0));
    }

    #[test]
    fn failed_pass_falls_back_to_updates() {
        let mut refs = refs_with(3);
        let est = FakeSmoother {
            invalid_at: None,
            fail: true,
        };
        smooth_target(&mut refs, &est, 0);

        assert_eq!(refs.counts.num_smoothing_failed, 1);
        assert_eq!(refs.updates_smooth, refs.updates);
    }

    #[test]
    fn only_new_entries_are_appended() {
        let mut refs = refs_with(6);
        refs.updates_smooth = refs.updates[..4].to_vec();
        let est = FakeSmoother {
            invalid_at: None,
            fail: false,
        };
        smooth_target(&mut refs, &est, 4);

        assert_eq!(refs.updates_smooth.len(), 6);
        // carried-over smoothed entries are untouched
        assert_eq!(refs.updates_smooth[3].state[0], 0.0);
        assert_eq!(refs.updates_smooth[4].state[0], 1.0);
        assert!(refs.updates_smooth.len() <= refs.updates.len());
    }
}
