//! Estimator contract and the reference Kalman estimator.
//!
//! The reconstruction engine only talks to an [`Estimator`]: it initializes
//! it, steps it over measurements and asks it to smooth, resample and store
//! finished update sequences. [`KalmanEstimator`] is the linear / IMM
//! implementation used by default.

use crate::{
    config::{EstimatorSettings, FilterKind, SmoothFailStrategy, StateInterpMode, StepFailStrategy},
    error::KalmanError,
    imm::ImmState,
    kf::{is_valid_state, rts_step, KalmanFilter, LinearKalmanFilter, MotionModel},
    types::{KalmanUpdate, Measurement, Reference, StateCov, StateVec},
};
use sensor_models::{state, CartesianObservation, ObservationModel};
use tracing::trace;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Result of one filter step.
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome {
    /// The filter accepted the measurement. `reinit_after_fail` names the
    /// cause when the step only succeeded by reinitializing.
    Success {
        update: KalmanUpdate,
        reinit_after_fail: Option<KalmanError>,
    },
    /// Too close in time to the previous step; filter unchanged
    SkippedStepTooSmall,
    /// Step rejected; filter keeps its last valid state
    Failed(KalmanError),
}

/// Filter collaborator driven by the reconstruction engine.
pub trait Estimator {
    /// Cold-start the filter from a measurement.
    fn init_from_measurement(&mut self, mm: &Measurement) -> KalmanUpdate;

    /// Resume the filter from a stored update.
    fn init_from_update(&mut self, update: &KalmanUpdate);

    fn step(&mut self, mm: &Measurement) -> StepOutcome;

    /// Backward (RTS) pass over `updates` in place.
    fn smooth_updates(
        &self,
        updates: &mut [KalmanUpdate],
        strategy: SmoothFailStrategy,
    ) -> Result<(), KalmanError>;

    /// Resample `updates` at a fixed interval. Returns the samples and the
    /// number of samples that could not be interpolated.
    fn interp_updates(&self, updates: &[KalmanUpdate]) -> (Vec<KalmanUpdate>, usize);

    fn store_updates(&self, updates: &[KalmanUpdate]) -> Vec<Reference> {
        updates
            .iter()
            .filter(|u| u.valid)
            .map(Reference::from_update)
            .collect()
    }

    /// Position of the current filter state, if initialized.
    fn current_position(&self) -> Option<(f64, f64)>;
}

/// Creates one estimator per target task.
pub trait EstimatorFactory: Send + Sync {
    fn create(&self, kind: FilterKind) -> Box<dyn Estimator>;
}

// ---------------------------------------------------------------------------
// Reference estimator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum FilterCore {
    Linear {
        kf: LinearKalmanFilter,
        state: StateVec,
        cov: StateCov,
    },
    Imm(ImmState),
}

impl FilterCore {
    fn state(&self) -> (&StateVec, &StateCov) {
        match self {
            FilterCore::Linear { state, cov, .. } => (state, cov),
            FilterCore::Imm(imm) => (&imm.fused_state, &imm.fused_cov),
        }
    }

    fn predict_update(
        &mut self,
        dt: f64,
        q_var: f64,
        obs: &CartesianObservation,
    ) -> Result<(), KalmanError> {
        let (z, h, r) = (obs.z(), obs.h_matrix(), obs.r_matrix());
        match self {
            FilterCore::Linear { kf, state, cov } => {
                let (x_pred, p_pred) = kf.predict(state, cov, dt, q_var);
                let res = kf.update(&x_pred, &p_pred, &z, &h, &r)?;
                *state = res.state;
                *cov = res.cov;
            }
            FilterCore::Imm(imm) => {
                let mut next = imm.clone();
                next.predict(dt, q_var);
                next.update(&z, &h, &r)?;
                if !is_valid_state(&next.fused_state, &next.fused_cov) {
                    return Err(KalmanError::InvalidState);
                }
                trace!(model = ?next.dominant_model(), "imm step");
                *imm = next;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct FilterState {
    t: f64,
    core: FilterCore,
}

/// Linear (uniform / accelerated) or IMM Kalman estimator.
#[derive(Clone, Debug)]
pub struct KalmanEstimator {
    kind: FilterKind,
    settings: EstimatorSettings,
    filter: Option<FilterState>,
}

impl KalmanEstimator {
    pub fn new(kind: FilterKind, settings: EstimatorSettings) -> Self {
        Self {
            kind,
            settings,
            filter: None,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Motion model used for smoothing and interpolation.
    fn motion_model(&self) -> MotionModel {
        match self.kind {
            FilterKind::Uniform => MotionModel::Uniform,
            FilterKind::Accelerated | FilterKind::Imm => MotionModel::Accelerated,
        }
    }

    fn tracks_accelerations(&self) -> bool {
        self.settings.track_accelerations && self.kind != FilterKind::Uniform
    }

    fn make_core(&self, state: StateVec, cov: StateCov) -> FilterCore {
        match self.kind {
            FilterKind::Uniform => FilterCore::Linear {
                kf: LinearKalmanFilter::new(MotionModel::Uniform),
                state,
                cov,
            },
            FilterKind::Accelerated => FilterCore::Linear {
                kf: LinearKalmanFilter::new(MotionModel::Accelerated),
                state,
                cov,
            },
            FilterKind::Imm => {
                FilterCore::Imm(ImmState::new(state, cov, self.settings.imm_switch_prob))
            }
        }
    }

    /// Initial state and covariance from a single measurement.
    fn initial_estimate(&self, mm: &Measurement) -> (StateVec, StateCov) {
        let s = &self.settings;
        let mut x = StateVec::zeros();
        let mut p = StateCov::zeros();

        x[state::PX] = mm.x;
        x[state::PY] = mm.y;
        match &mm.accuracy {
            Some(acc) => {
                let [xx, xy, yx, yy] = acc.covariance();
                p[(state::PX, state::PX)] = xx;
                p[(state::PX, state::PY)] = xy;
                p[(state::PY, state::PX)] = yx;
                p[(state::PY, state::PY)] = yy;
            }
            None => {
                p[(state::PX, state::PX)] = s.uncert.pos_var;
                p[(state::PY, state::PY)] = s.uncert.pos_var;
            }
        }

        let velocity = mm.velocity.filter(|_| s.track_velocities);
        let [vxx, vyy] = match velocity {
            Some(v) => {
                x[state::VX] = v.x;
                x[state::VY] = v.y;
                v.variances(s.uncert.speed_var)
            }
            None => [s.r_var_undef, s.r_var_undef],
        };
        p[(state::VX, state::VX)] = vxx;
        p[(state::VY, state::VY)] = vyy;

        let acceleration = mm.acceleration.filter(|_| self.tracks_accelerations());
        let [axx, ayy] = match acceleration {
            Some(a) => {
                x[state::AX] = a.x;
                x[state::AY] = a.y;
                a.variances(s.uncert.acc_var)
            }
            None => [s.r_var_undef, s.r_var_undef],
        };
        p[(state::AX, state::AX)] = axx;
        p[(state::AY, state::AY)] = ayy;

        (x, p)
    }

    fn observation(&self, mm: &Measurement) -> CartesianObservation {
        CartesianObservation::build(
            mm.position(),
            mm.accuracy.as_ref(),
            mm.velocity.as_ref(),
            mm.acceleration.as_ref(),
            &self.settings.uncert,
            self.settings.track_velocities,
            self.tracks_accelerations(),
        )
    }

    fn current_update(&self, mm: &Measurement, reinit: bool) -> Option<KalmanUpdate> {
        self.filter.as_ref().map(|f| {
            let (x, p) = f.core.state();
            let mut update = KalmanUpdate::new(f.t, *x, *p);
            update.reinit = reinit;
            update.source_id = mm.source_id;
            update.q_var_interp = mm.q_var_interp;
            update
        })
    }

    /// Reinit is due if the measurement is too far away in time or space.
    fn needs_reinit(&self, filter: &FilterState, mm: &Measurement) -> bool {
        let s = &self.settings;
        if s.reinit_check_time && mm.t - filter.t > s.max_dt {
            return true;
        }
        if s.reinit_check_distance {
            let (x, _) = filter.core.state();
            let dist = (mm.x - x[state::PX]).hypot(mm.y - x[state::PY]);
            if dist > s.max_distance_cart {
                return true;
            }
        }
        false
    }

    /// Split `updates` into chains starting at index 0 and at every reinit.
    fn chains(updates: &[KalmanUpdate]) -> Vec<std::ops::Range<usize>> {
        let mut chains = Vec::new();
        let mut begin = 0;
        for i in 1..updates.len() {
            if updates[i].reinit {
                chains.push(begin..i);
                begin = i;
            }
        }
        if begin < updates.len() {
            chains.push(begin..updates.len());
        }
        chains
    }

    /// Blend two predictions of the same instant.
    fn blend(
        &self,
        (x0, p0): (StateVec, StateCov),
        (x1, p1): (StateVec, StateCov),
        dt0: f64,
        dt1: f64,
    ) -> Result<(StateVec, StateCov), KalmanError> {
        let max_var = |p: &StateCov| p[(state::PX, state::PX)].max(p[(state::PY, state::PY)]);
        let w = match self.settings.resample_interp_mode {
            StateInterpMode::BlendLinear => dt0 / (dt0 + dt1),
            StateInterpMode::BlendStdDev => {
                let (s0, s1) = (max_var(&p0).sqrt(), max_var(&p1).sqrt());
                s0 / (s0 + s1)
            }
            StateInterpMode::BlendVar => {
                let (v0, v1) = (max_var(&p0), max_var(&p1));
                v0 / (v0 + v1)
            }
            StateInterpMode::BlendHalf => 0.5,
        };
        if !w.is_finite() {
            return Err(KalmanError::Numeric);
        }
        let x = x0 * (1.0 - w) + x1 * w;
        let p = p0 * (1.0 - w) + p1 * w;
        if !is_valid_state(&x, &p) {
            return Err(KalmanError::InvalidState);
        }
        Ok((x, p))
    }

    fn interpolate_between(
        &self,
        u0: &KalmanUpdate,
        u1: &KalmanUpdate,
        t: f64,
    ) -> Result<KalmanUpdate, KalmanError> {
        let kf = LinearKalmanFilter::new(self.motion_model());
        let q = self.settings.resample_q_var;
        let (dt0, dt1) = (t - u0.t, u1.t - t);
        let fwd = kf.predict(&u0.state, &u0.cov, dt0, q);
        let bwd = kf.predict(&u1.state, &u1.cov, -dt1, q);
        let (x, p) = self.blend(fwd, bwd, dt0, dt1)?;

        let mut update = KalmanUpdate::new(t, x, p);
        update.interpolated = true;
        Ok(update)
    }
}

impl Estimator for KalmanEstimator {
    fn init_from_measurement(&mut self, mm: &Measurement) -> KalmanUpdate {
        let (x, p) = self.initial_estimate(mm);
        self.filter = Some(FilterState {
            t: mm.t,
            core: self.make_core(x, p),
        });

        let mut update = KalmanUpdate::new(mm.t, x, p);
        update.reinit = true;
        update.source_id = mm.source_id;
        update.q_var_interp = mm.q_var_interp;
        update
    }

    fn init_from_update(&mut self, update: &KalmanUpdate) {
        self.filter = Some(FilterState {
            t: update.t,
            core: self.make_core(update.state, update.cov),
        });
    }

    fn step(&mut self, mm: &Measurement) -> StepOutcome {
        let Some(filter) = self.filter.as_ref() else {
            return StepOutcome::Success {
                update: self.init_from_measurement(mm),
                reinit_after_fail: None,
            };
        };

        let dt = mm.t - filter.t;
        if dt < self.settings.min_dt {
            return StepOutcome::SkippedStepTooSmall;
        }

        if self.needs_reinit(filter, mm) {
            trace!(t = mm.t, dt, "reinitializing filter");
            return StepOutcome::Success {
                update: self.init_from_measurement(mm),
                reinit_after_fail: None,
            };
        }

        let q_var = mm.q_var_interp.unwrap_or(self.settings.q_var);
        let obs = self.observation(mm);
        let mut core = filter.core.clone();

        match core.predict_update(dt, q_var, &obs) {
            Ok(()) => {
                self.filter = Some(FilterState { t: mm.t, core });
                match self.current_update(mm, false) {
                    Some(update) => StepOutcome::Success {
                        update,
                        reinit_after_fail: None,
                    },
                    None => StepOutcome::Failed(KalmanError::Other),
                }
            }
            Err(cause) => match self.settings.step_fail_strategy {
                StepFailStrategy::ReturnInvalid => StepOutcome::Failed(cause),
                StepFailStrategy::Reinit => {
                    trace!(t = mm.t, %cause, "reinitializing filter after failed step");
                    StepOutcome::Success {
                        update: self.init_from_measurement(mm),
                        reinit_after_fail: Some(cause),
                    }
                }
            },
        }
    }

    fn smooth_updates(
        &self,
        updates: &mut [KalmanUpdate],
        strategy: SmoothFailStrategy,
    ) -> Result<(), KalmanError> {
        let model = self.motion_model();
        let scale = self.settings.smoothing_scale;

        for chain in Self::chains(updates) {
            let chain = &mut updates[chain];
            for i in (0..chain.len().saturating_sub(1)).rev() {
                let next = &chain[i + 1];
                let dt = next.t - chain[i].t;
                let q_var = next.q_var_interp.unwrap_or(self.settings.q_var);
                let (x, p) = rts_step(
                    model,
                    &chain[i].state,
                    &chain[i].cov,
                    &next.state,
                    &next.cov,
                    dt,
                    q_var,
                    scale,
                )?;

                if is_valid_state(&x, &p) {
                    chain[i].state = x;
                    chain[i].cov = p;
                } else {
                    match strategy {
                        SmoothFailStrategy::SetInvalid => chain[i].valid = false,
                        SmoothFailStrategy::Stop => return Err(KalmanError::InvalidState),
                    }
                }
            }
        }
        Ok(())
    }

    fn interp_updates(&self, updates: &[KalmanUpdate]) -> (Vec<KalmanUpdate>, usize) {
        let sample_dt = self.settings.resample_dt;
        let min_dt = self.settings.min_dt;
        let mut out = Vec::new();
        let mut failed = 0;

        for chain in Self::chains(updates) {
            let chain = &updates[chain];
            let (Some(first), Some(last)) = (chain.first(), chain.last()) else {
                continue;
            };
            out.push(first.clone());

            let mut idx = 0;
            let mut tcur = first.t + sample_dt;
            while tcur < last.t {
                while idx + 2 < chain.len() && chain[idx + 1].t <= tcur {
                    idx += 1;
                }
                let (u0, u1) = (&chain[idx], &chain[idx + 1]);

                if tcur - u0.t < min_dt {
                    out.push(u0.clone());
                } else if u1.t - tcur < min_dt {
                    out.push(u1.clone());
                } else {
                    match self.interpolate_between(u0, u1, tcur) {
                        Ok(update) => out.push(update),
                        Err(_) => failed += 1,
                    }
                }
                tcur += sample_dt;
            }

            if out.last().map_or(true, |u| u.t < last.t) {
                out.push(last.clone());
            }
        }
        (out, failed)
    }

    fn current_position(&self) -> Option<(f64, f64)> {
        self.filter.as_ref().map(|f| {
            let (x, _) = f.core.state();
            (x[state::PX], x[state::PY])
        })
    }
}

/// Creates [`KalmanEstimator`]s sharing one set of estimator settings.
#[derive(Clone, Debug, Default)]
pub struct KalmanEstimatorFactory {
    pub settings: EstimatorSettings,
}

impl KalmanEstimatorFactory {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }
}

impl EstimatorFactory for KalmanEstimatorFactory {
    fn create(&self, kind: FilterKind) -> Box<dyn Estimator> {
        Box::new(KalmanEstimator::new(kind, self.settings.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceId;
    use approx::assert_abs_diff_eq;
    use sensor_models::{Kinematics2D, PositionAccuracy};

    fn mm(t: f64, x: f64, y: f64) -> Measurement {
        Measurement::new(t, SourceId((t * 10.0) as u64), x, y)
            .with_accuracy(PositionAccuracy::new(10.0, 10.0, 0.0))
    }

    fn track(est: &mut KalmanEstimator, n: usize) -> Vec<KalmanUpdate> {
        let mut updates = vec![est.init_from_measurement(&mm(0.0, 0.0, 0.0))];
        for k in 1..n {
            let t = k as f64;
            if let StepOutcome::Success { update, .. } = est.step(&mm(t, 100.0 * t, 0.0)) {
                updates.push(update);
            }
        }
        updates
    }

    #[test]
    fn init_uses_reported_kinematics() {
        let mut est = KalmanEstimator::new(FilterKind::Accelerated, EstimatorSettings::default());
        let m = mm(5.0, 1.0, 2.0)
            .with_velocity(Kinematics2D::new(10.0, -5.0).with_stddev(2.0, 2.0))
            .with_acceleration(Kinematics2D::new(1.0, 0.0));
        let u = est.init_from_measurement(&m);

        assert!(u.reinit);
        assert_eq!(u.source_id, m.source_id);
        assert_abs_diff_eq!(u.state[state::VX], 10.0);
        assert_abs_diff_eq!(u.state[state::AX], 1.0);
        assert_abs_diff_eq!(u.cov[(state::PX, state::PX)], 100.0);
        assert_abs_diff_eq!(u.cov[(state::VX, state::VX)], 4.0);
        assert_eq!(est.current_position(), Some((1.0, 2.0)));
    }

    #[test]
    fn uniform_ignores_reported_acceleration() {
        let mut est = KalmanEstimator::new(FilterKind::Uniform, EstimatorSettings::default());
        let m = mm(0.0, 0.0, 0.0).with_acceleration(Kinematics2D::new(5.0, 5.0));
        let u = est.init_from_measurement(&m);
        assert_abs_diff_eq!(u.state[state::AX], 0.0);
    }

    #[test]
    fn step_too_small_is_skipped() {
        let mut est = KalmanEstimator::new(FilterKind::Uniform, EstimatorSettings::default());
        est.init_from_measurement(&mm(1.0, 0.0, 0.0));
        assert_eq!(est.step(&mm(1.0, 1.0, 0.0)), StepOutcome::SkippedStepTooSmall);
        assert_eq!(est.current_position(), Some((0.0, 0.0)));
    }

    #[test]
    fn large_time_gap_reinitializes() {
        let mut est = KalmanEstimator::new(FilterKind::Imm, EstimatorSettings::default());
        est.init_from_measurement(&mm(0.0, 0.0, 0.0));
        match est.step(&mm(60.0, 5000.0, 0.0)) {
            StepOutcome::Success {
                update,
                reinit_after_fail,
            } => {
                assert!(update.reinit);
                assert!(reinit_after_fail.is_none());
                assert_abs_diff_eq!(update.state[state::PX], 5000.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn distance_check_is_opt_in() {
        let mut settings = EstimatorSettings::default();
        settings.max_distance_cart = 1000.0;
        let mut est = KalmanEstimator::new(FilterKind::Uniform, settings.clone());
        est.init_from_measurement(&mm(0.0, 0.0, 0.0));
        let StepOutcome::Success { update, .. } = est.step(&mm(1.0, 5000.0, 0.0)) else {
            panic!("step should succeed");
        };
        assert!(!update.reinit);

        settings.reinit_check_distance = true;
        let mut est = KalmanEstimator::new(FilterKind::Uniform, settings);
        est.init_from_measurement(&mm(0.0, 0.0, 0.0));
        let StepOutcome::Success { update, .. } = est.step(&mm(1.0, 5000.0, 0.0)) else {
            panic!("step should succeed");
        };
        assert!(update.reinit);
    }

    #[test]
    fn numeric_failure_follows_strategy() {
        // zero measurement noise on a zero-covariance state makes S singular
        let degenerate = |t: f64| {
            Measurement::new(t, SourceId(1), 0.0, 0.0)
                .with_accuracy(PositionAccuracy::new(0.0, 0.0, 0.0))
        };
        let zero = KalmanUpdate::new(0.0, StateVec::zeros(), StateCov::zeros());
        let mut settings = EstimatorSettings::default();
        settings.q_var = 0.0;

        let mut est = KalmanEstimator::new(FilterKind::Accelerated, settings.clone());
        est.init_from_update(&zero);
        assert!(matches!(est.step(&degenerate(1.0)), StepOutcome::Failed(_)));

        settings.step_fail_strategy = StepFailStrategy::Reinit;
        let mut est = KalmanEstimator::new(FilterKind::Accelerated, settings);
        est.init_from_update(&zero);
        match est.step(&degenerate(1.0)) {
            StepOutcome::Success {
                update,
                reinit_after_fail,
            } => {
                assert!(update.reinit);
                assert!(reinit_after_fail.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn smoothing_keeps_count_and_reduces_variance() {
        let mut est = KalmanEstimator::new(FilterKind::Uniform, EstimatorSettings::default());
        let updates = track(&mut est, 10);
        let mut smoothed = updates.clone();
        est.smooth_updates(&mut smoothed, SmoothFailStrategy::SetInvalid)
            .unwrap();

        assert_eq!(smoothed.len(), updates.len());
        assert!(smoothed.iter().all(|u| u.valid));
        // the last update has no successor and is unchanged
        assert_eq!(smoothed[9], updates[9]);
        let mid = 5;
        assert!(
            smoothed[mid].cov[(state::PX, state::PX)] <= updates[mid].cov[(state::PX, state::PX)]
        );
    }

    #[test]
    fn smoothing_does_not_cross_reinit() {
        let mut est = KalmanEstimator::new(FilterKind::Uniform, EstimatorSettings::default());
        let mut updates = track(&mut est, 6);
        updates[3].reinit = true;
        let before = updates[2].clone();
        let mut smoothed = updates.clone();
        est.smooth_updates(&mut smoothed, SmoothFailStrategy::SetInvalid)
            .unwrap();
        // chain end: no successor inside its chain
        assert_eq!(smoothed[2], before);
    }

    #[test]
    fn interpolation_samples_on_grid() {
        let mut settings = EstimatorSettings::default();
        settings.resample_dt = 0.5;
        let mut est = KalmanEstimator::new(FilterKind::Uniform, settings);
        let updates = track(&mut est, 5);

        let (samples, failed) = est.interp_updates(&updates);
        assert_eq!(failed, 0);
        let times: Vec<f64> = samples.iter().map(|u| u.t).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0]);
        assert!(samples[1].interpolated);
        assert!(!samples[2].interpolated);
        assert!(samples[1].position().0 > samples[0].position().0);
        assert!(samples[1].position().0 < samples[2].position().0);
    }

    #[test]
    fn interpolation_emits_last_update_of_each_chain() {
        let mut settings = EstimatorSettings::default();
        settings.resample_dt = 3.0;
        let mut est = KalmanEstimator::new(FilterKind::Accelerated, settings);
        let mut updates = track(&mut est, 6);
        updates[3].reinit = true;

        let (samples, _) = est.interp_updates(&updates);
        let times: Vec<f64> = samples.iter().map(|u| u.t).collect();
        assert_eq!(times, vec![0.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn store_skips_invalid_updates() {
        let est = KalmanEstimator::new(FilterKind::Uniform, EstimatorSettings::default());
        let mut a = KalmanUpdate::new(0.0, StateVec::zeros(), StateCov::identity());
        a.reinit = true;
        let mut b = a.clone();
        b.t = 1.0;
        b.valid = false;
        let refs = est.store_updates(&[a, b]);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].reset);
    }
}
