//! Reference accuracy against ground truth: RMSE position/velocity, coverage.

use crate::target::TruthSample;
use recon_core::{types::TimeKey, Reference, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated accuracy statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    /// Targets with at least one evaluated reference
    pub n_targets: u64,
    /// Targets with truth but no published reference
    pub n_missing_targets: u64,
    /// References compared against truth
    pub n_matched: u64,
    /// References outside the target's truth span (or for unknown targets)
    pub n_unmatched: u64,
    /// Sum of squared position errors (for RMSE)
    pub sum_sq_pos_err: f64,
    /// Sum of squared velocity errors (for RMSE)
    pub sum_sq_vel_err: f64,
    /// Largest position error seen (m)
    pub max_pos_err: f64,
}

impl AccuracyMetrics {
    /// Root-mean-square position error (meters, 2D).
    pub fn rmse_position(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_pos_err / self.n_matched as f64).sqrt()
    }

    /// Root-mean-square velocity error (m/s, 2D).
    pub fn rmse_velocity(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_vel_err / self.n_matched as f64).sqrt()
    }

    /// Compare one reference with the truth sample at its time.
    pub fn accumulate(&mut self, reference: &Reference, truth: &TruthSample) {
        let dx = reference.x - truth.x;
        let dy = reference.y - truth.y;
        let dvx = reference.vx - truth.vx;
        let dvy = reference.vy - truth.vy;
        let pos_sq = dx * dx + dy * dy;
        self.sum_sq_pos_err += pos_sq;
        self.sum_sq_vel_err += dvx * dvx + dvy * dvy;
        self.max_pos_err = self.max_pos_err.max(pos_sq.sqrt());
        self.n_matched += 1;
    }

    /// Evaluate every published trajectory against the truth of its target.
    pub fn evaluate(
        published: &BTreeMap<TargetId, BTreeMap<TimeKey, Reference>>,
        truth: &BTreeMap<TargetId, Vec<TruthSample>>,
    ) -> Self {
        let mut metrics = Self::default();

        for (id, references) in published {
            let Some(samples) = truth.get(id) else {
                metrics.n_unmatched += references.len() as u64;
                continue;
            };
            let before = metrics.n_matched;
            for reference in references.values() {
                match truth_at(samples, reference.t) {
                    Some(sample) => metrics.accumulate(reference, &sample),
                    None => metrics.n_unmatched += 1,
                }
            }
            if metrics.n_matched > before {
                metrics.n_targets += 1;
            }
        }

        metrics.n_missing_targets = truth
            .keys()
            .filter(|id| published.get(id).map_or(true, BTreeMap::is_empty))
            .count() as u64;
        metrics
    }
}

/// Truth at `t`, interpolated between the bracketing samples.
pub fn truth_at(samples: &[TruthSample], t: f64) -> Option<TruthSample> {
    let idx = samples.partition_point(|s| s.t < t);
    let after = samples.get(idx)?;
    if after.t == t {
        return Some(*after);
    }
    let before = samples.get(idx.checked_sub(1)?)?;
    Some(before.lerp(after, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ordered_float::OrderedFloat;
    use recon_core::{KalmanUpdate, StateCov, StateVec};

    fn sample(t: f64) -> TruthSample {
        TruthSample {
            t,
            x: 10.0 * t,
            y: 0.0,
            vx: 10.0,
            vy: 0.0,
        }
    }

    fn reference(t: f64, x: f64) -> Reference {
        let mut state = StateVec::zeros();
        state[0] = x;
        state[2] = 10.0;
        Reference::from_update(&KalmanUpdate::new(t, state, StateCov::identity()))
    }

    #[test]
    fn truth_is_interpolated_inside_span_only() {
        let samples: Vec<_> = (0..5).map(|t| sample(t as f64)).collect();
        assert_abs_diff_eq!(truth_at(&samples, 2.5).unwrap().x, 25.0);
        assert_eq!(truth_at(&samples, 3.0), Some(sample(3.0)));
        assert!(truth_at(&samples, -0.1).is_none());
        assert!(truth_at(&samples, 4.1).is_none());
    }

    #[test]
    fn rmse_over_published_references() {
        let truth = BTreeMap::from([
            (TargetId(1), (0..10).map(|t| sample(t as f64)).collect::<Vec<_>>()),
            (TargetId(2), vec![sample(0.0)]),
        ]);
        let mut refs = BTreeMap::new();
        // errors of 3 m and 4 m
        refs.insert(OrderedFloat(1.0), reference(1.0, 13.0));
        refs.insert(OrderedFloat(2.0), reference(2.0, 16.0));
        refs.insert(OrderedFloat(20.0), reference(20.0, 200.0));
        let published = BTreeMap::from([(TargetId(1), refs)]);

        let m = AccuracyMetrics::evaluate(&published, &truth);
        assert_eq!(m.n_matched, 2);
        assert_eq!(m.n_unmatched, 1);
        assert_eq!(m.n_targets, 1);
        assert_eq!(m.n_missing_targets, 1);
        assert_abs_diff_eq!(m.rmse_position(), (12.5f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(m.rmse_velocity(), 0.0);
        assert_abs_diff_eq!(m.max_pos_err, 4.0);
    }
}
