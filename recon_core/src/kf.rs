//! Linear Kalman filter: predict, update and RTS smoothing steps.
//!
//! ## State vector
//! x = [px, py, vx, vy, ax, ay]ᵀ  (6-dimensional)
//!
//! ## Motion models
//! - **Uniform** (constant velocity): px += vx·dt, acceleration pinned to 0.
//! - **Accelerated** (constant acceleration): px += vx·dt + ax·dt²/2,
//!   vx += ax·dt.
//!
//! ## Process noise Q
//! Uniform uses discrete white noise acceleration (DWNA) on the position /
//! velocity block plus a small diagonal term on the pinned acceleration so
//! that predicted covariances stay invertible for smoothing. Accelerated uses
//! the discrete Wiener process acceleration model (DWPA).

use crate::{
    error::KalmanError,
    types::{StateCov, StateVec},
};
use nalgebra::Matrix6;
use sensor_models::{
    observation::{DMat, DVec},
    state,
};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Predict / update pair of a Kalman filter.
pub trait KalmanFilter {
    /// Predict state and covariance by `dt` seconds (negative for backwards).
    fn predict(&self, state: &StateVec, cov: &StateCov, dt: f64, q_var: f64)
        -> (StateVec, StateCov);

    /// Correct `(state, cov)` with observation `z = H·x + v`, `v ~ N(0, R)`.
    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult, KalmanError>;
}

/// Corrected estimate plus the innovation it was computed from.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation ν = z − H·x
    pub innovation: DVec,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: DMat,
}

// ---------------------------------------------------------------------------
// Motion models
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionModel {
    Uniform,
    Accelerated,
}

impl MotionModel {
    /// Transition F over `dt`.
    pub fn transition_matrix(self, dt: f64) -> Matrix6<f64> {
        let mut f = Matrix6::<f64>::identity();
        f[(state::PX, state::VX)] = dt;
        f[(state::PY, state::VY)] = dt;
        match self {
            MotionModel::Uniform => {
                f[(state::AX, state::AX)] = 0.0;
                f[(state::AY, state::AY)] = 0.0;
            }
            MotionModel::Accelerated => {
                let half_dt2 = 0.5 * dt * dt;
                f[(state::PX, state::AX)] = half_dt2;
                f[(state::PY, state::AY)] = half_dt2;
                f[(state::VX, state::AX)] = dt;
                f[(state::VY, state::AY)] = dt;
            }
        }
        f
    }

    /// Process noise Q over `|dt|` for acceleration variance `q_var`.
    pub fn process_noise(self, dt: f64, q_var: f64) -> Matrix6<f64> {
        let dt = dt.abs();
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        let mut qm = Matrix6::<f64>::zeros();
        for (p, v, a) in [
            (state::PX, state::VX, state::AX),
            (state::PY, state::VY, state::AY),
        ] {
            qm[(p, p)] = q_var * dt4 / 4.0;
            qm[(p, v)] = q_var * dt3 / 2.0;
            qm[(v, p)] = q_var * dt3 / 2.0;
            qm[(v, v)] = q_var * dt2;
            match self {
                MotionModel::Uniform => {
                    qm[(a, a)] = q_var * dt.max(f64::EPSILON);
                }
                MotionModel::Accelerated => {
                    qm[(p, a)] = q_var * dt2 / 2.0;
                    qm[(a, p)] = q_var * dt2 / 2.0;
                    qm[(v, a)] = q_var * dt;
                    qm[(a, v)] = q_var * dt;
                    qm[(a, a)] = q_var;
                }
            }
        }
        qm
    }
}

/// Linear Kalman filter for one motion model.
#[derive(Clone, Copy, Debug)]
pub struct LinearKalmanFilter {
    pub model: MotionModel,
}

impl LinearKalmanFilter {
    pub fn new(model: MotionModel) -> Self {
        Self { model }
    }
}

impl KalmanFilter for LinearKalmanFilter {
    fn predict(
        &self,
        state: &StateVec,
        cov: &StateCov,
        dt: f64,
        q_var: f64,
    ) -> (StateVec, StateCov) {
        let f = self.model.transition_matrix(dt);
        let q = self.model.process_noise(dt, q_var);
        (f * state, f * cov * f.transpose() + q)
    }

    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        z: &DVec,
        h: &DMat,
        r: &DMat,
    ) -> Result<KfUpdateResult, KalmanError> {
        let n = state::DIM;
        let x = DVec::from_column_slice(state.as_slice());
        let p = DMat::from_column_slice(n, n, cov.as_slice());

        let p_ht = &p * h.transpose();
        let innovation = z - h * &x;
        let s = h * &p_ht + r;

        // K = P·Hᵀ·S⁻¹, solved from S·Kᵀ = H·P
        let k_t = s
            .clone()
            .lu()
            .solve(&p_ht.transpose())
            .ok_or(KalmanError::Numeric)?;
        let k = k_t.transpose();
        let new_state = StateVec::from_iterator((x + &k * &innovation).iter().copied());

        // Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
        let a = DMat::identity(n, n) - &k * h;
        let p_upd = &a * &p * a.transpose() + &k * r * &k_t;
        let new_cov = StateCov::from_iterator(p_upd.iter().copied());

        if !is_valid_state(&new_state, &new_cov) {
            return Err(KalmanError::InvalidState);
        }

        Ok(KfUpdateResult {
            state: new_state,
            cov: new_cov,
            innovation,
            innovation_cov: s,
        })
    }
}

/// Finite state with finite covariance and positive position / velocity
/// variances.
pub fn is_valid_state(state: &StateVec, cov: &StateCov) -> bool {
    state.iter().all(|v| v.is_finite())
        && cov.iter().all(|v| v.is_finite())
        && [state::PX, state::PY, state::VX, state::VY]
            .iter()
            .all(|&i| cov[(i, i)] > 0.0)
}

// ---------------------------------------------------------------------------
// RTS smoothing
// ---------------------------------------------------------------------------

/// One backward Rauch-Tung-Striebel step.
///
/// Smooths `(x0, p0)` at time t0 given the already smoothed successor
/// `(x1_smooth, p1_smooth)` at `t0 + dt`.
#[allow(clippy::too_many_arguments)]
pub fn rts_step(
    model: MotionModel,
    x0: &StateVec,
    p0: &StateCov,
    x1_smooth: &StateVec,
    p1_smooth: &StateCov,
    dt: f64,
    q_var: f64,
    scale: f64,
) -> Result<(StateVec, StateCov), KalmanError> {
    let f = model.transition_matrix(dt);
    let q = model.process_noise(dt, q_var);

    let x_pred = f * x0;
    let p_pred = f * p0 * f.transpose() + q;
    let p_pred_inv = p_pred.try_inverse().ok_or(KalmanError::Numeric)?;

    let gain = p0 * f.transpose() * p_pred_inv * scale;
    let x = x0 + gain * (x1_smooth - x_pred);
    let p = p0 + gain * (p1_smooth - p_pred) * gain.transpose();
    Ok((x, p))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn position_obs() -> DMat {
        DMat::from_row_slice(2, 6, &[1., 0., 0., 0., 0., 0., 0., 1., 0., 0., 0., 0.])
    }

    #[test]
    fn predict_constant_velocity() {
        let kf = LinearKalmanFilter::new(MotionModel::Uniform);
        let state = StateVec::new(0.0, 0.0, 10.0, 0.0, 3.0, 0.0);
        let (pred, _) = kf.predict(&state, &StateCov::identity(), 1.0, 1.0);
        assert_abs_diff_eq!(pred[state::PX], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[state::VX], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[state::AX], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn predict_constant_acceleration() {
        let kf = LinearKalmanFilter::new(MotionModel::Accelerated);
        let state = StateVec::new(0.0, 0.0, 10.0, 0.0, 2.0, 0.0);
        let (pred, _) = kf.predict(&state, &StateCov::identity(), 2.0, 1.0);
        assert_abs_diff_eq!(pred[state::PX], 24.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[state::VX], 14.0, epsilon = 1e-9);
    }

    #[test]
    fn update_reduces_uncertainty() {
        let kf = LinearKalmanFilter::new(MotionModel::Uniform);
        let state = StateVec::new(100.0, 50.0, 5.0, 2.0, 0.0, 0.0);
        let cov = StateCov::identity() * 100.0;
        let r = DMat::from_diagonal(&DVec::from_vec(vec![9.0, 9.0]));
        let z = DVec::from_vec(vec![101.0, 51.0]);

        let res = kf.update(&state, &cov, &z, &position_obs(), &r).unwrap();
        assert!(res.cov.trace() < cov.trace(), "update should reduce uncertainty");
        assert!(res.state[state::PX] > 100.0 && res.state[state::PX] < 101.0);
    }

    #[test]
    fn singular_innovation_is_numeric_error() {
        let kf = LinearKalmanFilter::new(MotionModel::Uniform);
        let cov = StateCov::zeros();
        let r = DMat::zeros(2, 2);
        let z = DVec::from_vec(vec![1.0, 1.0]);
        let res = kf.update(&StateVec::zeros(), &cov, &z, &position_obs(), &r);
        assert_eq!(res.unwrap_err(), KalmanError::Numeric);
    }

    #[test]
    fn rts_pulls_towards_smoothed_successor() {
        let model = MotionModel::Uniform;
        let x0 = StateVec::new(0.0, 0.0, 10.0, 0.0, 0.0, 0.0);
        let p0 = StateCov::identity() * 100.0;
        // successor says the target ended up further along than predicted
        let x1 = StateVec::new(20.0, 0.0, 10.0, 0.0, 0.0, 0.0);
        let p1 = StateCov::identity() * 10.0;

        let (xs, ps) = rts_step(model, &x0, &p0, &x1, &p1, 1.0, 1.0, 1.0).unwrap();
        assert!(xs[state::PX] > 0.0);
        assert!(ps[(state::PX, state::PX)] < p0[(state::PX, state::PX)]);
    }

    #[test]
    fn rts_with_zero_scale_is_identity() {
        let x0 = StateVec::new(1.0, 2.0, 3.0, 4.0, 0.0, 0.0);
        let p0 = StateCov::identity() * 5.0;
        let x1 = StateVec::new(50.0, 2.0, 3.0, 4.0, 0.0, 0.0);
        let (xs, ps) = rts_step(
            MotionModel::Accelerated,
            &x0,
            &p0,
            &x1,
            &StateCov::identity(),
            1.0,
            1.0,
            0.0,
        )
        .unwrap();
        assert_abs_diff_eq!(xs, x0, epsilon = 1e-12);
        assert_abs_diff_eq!(ps, p0, epsilon = 1e-12);
    }
}
