//! Observation models: z, H and R for a reconstruction measurement.
//!
//! # Components observed
//! - **Position** `[px, py]` is always observed.
//! - **Velocity** `[vx, vy]` when the report carries it and the filter tracks it.
//! - **Acceleration** `[ax, ay]` likewise.
//!
//! H is a selection matrix over the 6-state `[px, py, vx, vy, ax, ay]`, R is
//! block-diagonal with one 2×2 block per observed component. Components
//! without a reported accuracy use the [`Uncertainty`] defaults.

use crate::{state, uncertainty::Uncertainty};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub type DMat = DMatrix<f64>;
pub type DVec = DVector<f64>;

/// Trait for an observation model over the kinematic state.
pub trait ObservationModel {
    /// Observation matrix H (dim × 6)
    fn h_matrix(&self) -> DMat;
    /// Measurement noise covariance R (dim × dim)
    fn r_matrix(&self) -> DMat;
    /// Observation vector z
    fn z(&self) -> DVec;
    /// Map state to expected measurement h(x)
    fn apply(&self, state: &[f64; state::DIM]) -> DVec {
        let x = DVec::from_iterator(state::DIM, state.iter().copied());
        self.h_matrix() * x
    }
}

// ---------------------------------------------------------------------------
// Measurement components
// ---------------------------------------------------------------------------

/// Position accuracy reported with a measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionAccuracy {
    /// Std deviation in x (meters)
    pub x_stddev: f64,
    /// Std deviation in y (meters)
    pub y_stddev: f64,
    /// xy covariance (m²)
    pub xy_cov: f64,
}

impl PositionAccuracy {
    pub fn new(x_stddev: f64, y_stddev: f64, xy_cov: f64) -> Self {
        Self { x_stddev, y_stddev, xy_cov }
    }

    /// 2×2 covariance block, row-major.
    pub fn covariance(&self) -> [f64; 4] {
        [
            self.x_stddev * self.x_stddev,
            self.xy_cov,
            self.xy_cov,
            self.y_stddev * self.y_stddev,
        ]
    }
}

/// A 2D kinematic vector (velocity or acceleration) with optional accuracy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kinematics2D {
    pub x: f64,
    pub y: f64,
    /// Per-axis standard deviation, if reported
    pub stddev: Option<[f64; 2]>,
}

impl Kinematics2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, stddev: None }
    }

    pub fn with_stddev(mut self, sx: f64, sy: f64) -> Self {
        self.stddev = Some([sx, sy]);
        self
    }

    /// Euclidean norm (speed for a velocity vector).
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Per-axis variances, `default_var` where no accuracy was reported.
    pub fn variances(&self, default_var: f64) -> [f64; 2] {
        match self.stddev {
            Some([sx, sy]) => [sx * sx, sy * sy],
            None => [default_var, default_var],
        }
    }
}

// ---------------------------------------------------------------------------
// Cartesian observation
// ---------------------------------------------------------------------------

/// Linear cartesian observation of position plus whichever kinematics are
/// available and tracked.
#[derive(Clone, Debug)]
pub struct CartesianObservation {
    /// Observed values, 2 per component
    values: Vec<f64>,
    /// State index of the first element of each observed component
    components: Vec<usize>,
    /// 2×2 covariance blocks (row-major), one per component
    blocks: Vec<[f64; 4]>,
}

impl CartesianObservation {
    /// Build the observation for a measurement.
    ///
    /// `track_velocities` / `track_accelerations` gate whether reported
    /// kinematics enter the update at all.
    pub fn build(
        position: [f64; 2],
        accuracy: Option<&PositionAccuracy>,
        velocity: Option<&Kinematics2D>,
        acceleration: Option<&Kinematics2D>,
        uncert: &Uncertainty,
        track_velocities: bool,
        track_accelerations: bool,
    ) -> Self {
        let mut obs = Self {
            values: Vec::with_capacity(6),
            components: Vec::with_capacity(3),
            blocks: Vec::with_capacity(3),
        };

        let pos_block = accuracy
            .map(|a| a.covariance())
            .unwrap_or([uncert.pos_var, 0.0, 0.0, uncert.pos_var]);
        obs.push(state::PX, position, pos_block);

        if track_velocities {
            if let Some(v) = velocity {
                let [vx, vy] = v.variances(uncert.speed_var);
                obs.push(state::VX, [v.x, v.y], [vx, 0.0, 0.0, vy]);
            }
        }
        if track_accelerations {
            if let Some(a) = acceleration {
                let [ax, ay] = a.variances(uncert.acc_var);
                obs.push(state::AX, [a.x, a.y], [ax, 0.0, 0.0, ay]);
            }
        }
        obs
    }

    fn push(&mut self, first_idx: usize, value: [f64; 2], block: [f64; 4]) {
        self.values.extend_from_slice(&value);
        self.components.push(first_idx);
        self.blocks.push(block);
    }

    /// Observation dimension (2, 4 or 6).
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True if the observation includes the velocity component.
    pub fn observes_velocity(&self) -> bool {
        self.components.contains(&state::VX)
    }
}

impl ObservationModel for CartesianObservation {
    fn h_matrix(&self) -> DMat {
        let mut h = DMat::zeros(self.dim(), state::DIM);
        for (i, &c) in self.components.iter().enumerate() {
            h[(2 * i, c)] = 1.0;
            h[(2 * i + 1, c + 1)] = 1.0;
        }
        h
    }

    fn r_matrix(&self) -> DMat {
        let mut r = DMat::zeros(self.dim(), self.dim());
        for (i, b) in self.blocks.iter().enumerate() {
            let o = 2 * i;
            r[(o, o)] = b[0];
            r[(o, o + 1)] = b[1];
            r[(o + 1, o)] = b[2];
            r[(o + 1, o + 1)] = b[3];
        }
        r
    }

    fn z(&self) -> DVec {
        DVec::from_vec(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn position_only_shape() {
        let obs = CartesianObservation::build(
            [100.0, 200.0],
            None,
            None,
            None,
            &Uncertainty::default(),
            true,
            true,
        );
        let h = obs.h_matrix();
        assert_eq!((h.nrows(), h.ncols()), (2, 6));
        assert_abs_diff_eq!(obs.r_matrix()[(0, 0)], 100.0);
    }

    #[test]
    fn velocity_rows_only_when_tracked() {
        let vel = Kinematics2D::new(10.0, -5.0).with_stddev(2.0, 3.0);
        let uncert = Uncertainty::default();

        let tracked =
            CartesianObservation::build([0.0, 0.0], None, Some(&vel), None, &uncert, true, false);
        assert_eq!(tracked.dim(), 4);
        assert!(tracked.observes_velocity());
        let h = tracked.h_matrix();
        assert_abs_diff_eq!(h[(2, state::VX)], 1.0);
        assert_abs_diff_eq!(h[(3, state::VY)], 1.0);
        assert_abs_diff_eq!(tracked.r_matrix()[(3, 3)], 9.0);

        let untracked =
            CartesianObservation::build([0.0, 0.0], None, Some(&vel), None, &uncert, false, false);
        assert_eq!(untracked.dim(), 2);
    }

    #[test]
    fn accuracy_populates_position_block() {
        let acc = PositionAccuracy::new(3.0, 4.0, 1.5);
        let obs = CartesianObservation::build(
            [1.0, 2.0],
            Some(&acc),
            None,
            None,
            &Uncertainty::default(),
            true,
            true,
        );
        let r = obs.r_matrix();
        assert_abs_diff_eq!(r[(0, 0)], 9.0);
        assert_abs_diff_eq!(r[(1, 1)], 16.0);
        assert_abs_diff_eq!(r[(0, 1)], 1.5);
        let state = [1.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        assert_abs_diff_eq!((obs.z() - obs.apply(&state)).norm(), 0.0);
    }
}
