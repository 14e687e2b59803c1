//! Fundamental types used across the reconstruction engine.

use nalgebra::{Matrix6, Vector6};
use ordered_float::OrderedFloat;
use sensor_models::{state, Kinematics2D, PositionAccuracy};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

// ---------------------------------------------------------------------------
// State types: f64 throughout, fixed 6-dimensional kinematic state.
// ---------------------------------------------------------------------------

/// Kinematic state vector: [px, py, vx, vy, ax, ay]
pub type StateVec = Vector6<f64>;

/// 6×6 state covariance matrix
pub type StateCov = Matrix6<f64>;

/// Totally ordered timestamp (seconds), used as map key.
pub type TimeKey = OrderedFloat<f64>;

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

/// Unique target number.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TargetId(pub u32);

/// Source record number of the report a measurement was derived from.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SourceId(pub u64);

/// Report stream identity: (content type, sensor, line).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StreamKey {
    pub content_id: u32,
    pub sensor_id: u32,
    pub line_id: u32,
}

impl StreamKey {
    pub fn new(content_id: u32, sensor_id: u32, line_id: u32) -> Self {
        Self {
            content_id,
            sensor_id,
            line_id,
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UTN{}", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// One sensor report prepared as filter input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Timestamp in seconds
    pub t: f64,
    /// Originating report; required before the measurement is filtered
    pub source_id: Option<SourceId>,
    /// Local cartesian position (meters)
    pub x: f64,
    pub y: f64,
    /// Reported position accuracy
    pub accuracy: Option<PositionAccuracy>,
    pub velocity: Option<Kinematics2D>,
    pub acceleration: Option<Kinematics2D>,
    /// Position accuracy was corrected upstream
    pub corrected: bool,
    /// Synthesized by interpolation rather than reported
    pub interpolated: bool,
    /// Process variance override for interpolated samples
    pub q_var_interp: Option<f64>,
}

impl Measurement {
    pub fn new(t: f64, source_id: SourceId, x: f64, y: f64) -> Self {
        Self {
            t,
            source_id: Some(source_id),
            x,
            y,
            accuracy: None,
            velocity: None,
            acceleration: None,
            corrected: false,
            interpolated: false,
            q_var_interp: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: PositionAccuracy) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_velocity(mut self, velocity: Kinematics2D) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_acceleration(mut self, acceleration: Kinematics2D) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    pub fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    /// Ordering by (timestamp, source id).
    pub fn cmp_time_source(&self, other: &Self) -> Ordering {
        self.t
            .total_cmp(&other.t)
            .then_with(|| self.source_id.cmp(&other.source_id))
    }

    /// Key identifying the measurement within a target: (source, time).
    pub fn unique_id(&self) -> Option<(SourceId, TimeKey)> {
        self.source_id.map(|s| (s, OrderedFloat(self.t)))
    }
}

/// Sort measurements by (timestamp, source id).
pub fn sort_measurements(measurements: &mut [Measurement]) {
    measurements.sort_by(Measurement::cmp_time_source);
}

// ---------------------------------------------------------------------------
// KalmanUpdate
// ---------------------------------------------------------------------------

/// One filter output at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanUpdate {
    pub t: f64,
    pub state: StateVec,
    pub cov: StateCov,
    pub valid: bool,
    /// First update of a filter chain (cold init or reinit)
    pub reinit: bool,
    /// Produced by resampling
    pub interpolated: bool,
    pub source_id: Option<SourceId>,
    /// Carried from the originating measurement
    pub q_var_interp: Option<f64>,
}

impl KalmanUpdate {
    pub fn new(t: f64, state: StateVec, cov: StateCov) -> Self {
        Self {
            t,
            state,
            cov,
            valid: true,
            reinit: false,
            interpolated: false,
            source_id: None,
            q_var_interp: None,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[state::PX], self.state[state::PY])
    }

    pub fn time_key(&self) -> TimeKey {
        OrderedFloat(self.t)
    }
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

/// A published trajectory sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub t: f64,
    pub source_id: Option<SourceId>,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub ax: f64,
    pub ay: f64,
    pub x_stddev: f64,
    pub y_stddev: f64,
    pub xy_cov: f64,
    pub vx_stddev: f64,
    pub vy_stddev: f64,
    /// First sample of a filter chain
    pub reset: bool,
    /// Produced by resampling
    pub interpolated: bool,
}

impl Reference {
    /// Derive a reference sample from a filter update.
    pub fn from_update(update: &KalmanUpdate) -> Self {
        let x = &update.state;
        let p = &update.cov;
        Self {
            t: update.t,
            source_id: update.source_id,
            x: x[state::PX],
            y: x[state::PY],
            vx: x[state::VX],
            vy: x[state::VY],
            ax: x[state::AX],
            ay: x[state::AY],
            x_stddev: p[(state::PX, state::PX)].max(0.0).sqrt(),
            y_stddev: p[(state::PY, state::PY)].max(0.0).sqrt(),
            xy_cov: p[(state::PX, state::PY)],
            vx_stddev: p[(state::VX, state::VX)].max(0.0).sqrt(),
            vy_stddev: p[(state::VY, state::VY)].max(0.0).sqrt(),
            reset: update.reinit,
            interpolated: update.interpolated,
        }
    }

    /// Ground speed (m/s)
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    pub fn time_key(&self) -> TimeKey {
        OrderedFloat(self.t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurements_sort_by_time_then_source() {
        let mut mms = vec![
            Measurement::new(2.0, SourceId(1), 0.0, 0.0),
            Measurement::new(1.0, SourceId(9), 0.0, 0.0),
            Measurement::new(1.0, SourceId(3), 0.0, 0.0),
        ];
        sort_measurements(&mut mms);
        let order: Vec<_> = mms.iter().map(|m| m.source_id.unwrap().0).collect();
        assert_eq!(order, vec![3, 9, 1]);
    }

    #[test]
    fn reference_from_update_extracts_stddevs() {
        let state = StateVec::new(1.0, 2.0, 3.0, 4.0, 0.0, 0.0);
        let mut cov = StateCov::identity();
        cov[(0, 0)] = 25.0;
        cov[(1, 1)] = 16.0;
        let mut update = KalmanUpdate::new(10.0, state, cov);
        update.reinit = true;
        let r = Reference::from_update(&update);
        assert_eq!(r.x_stddev, 5.0);
        assert_eq!(r.y_stddev, 4.0);
        assert_eq!(r.speed(), 5.0);
        assert!(r.reset);
    }
}
