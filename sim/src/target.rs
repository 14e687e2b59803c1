//! Ground-truth target trajectories.
//!
//! Each target carries a true planar state `[px, py, vx, vy]` and a
//! `MotionSpec` describing how it moves. The session steps every target
//! forward on the simulation clock and samples truth for evaluation.

use recon_core::TargetId;
use serde::{Deserialize, Serialize};

/// How a target moves between simulation steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Straight line at constant speed.
    ConstantVelocity,
    /// Coordinated turn. `omega` = turn rate (rad/s), positive is left.
    ConstantTurn { omega: f64 },
    /// Constant acceleration `ax, ay` in m/s².
    ConstantAccel { ax: f64, ay: f64 },
    /// Switch motion at given simulation times.
    /// `segments` is sorted ascending by start time; the active motion is the
    /// last one whose start time is `<= t`.
    Segmented {
        segments: Vec<(f64, Box<MotionSpec>)>,
    },
}

impl MotionSpec {
    /// Propagate `state` by `dt` seconds starting at time `t`.
    fn propagate(&self, state: &mut [f64; 4], t: f64, dt: f64) {
        match self {
            MotionSpec::ConstantVelocity => {
                state[0] += state[2] * dt;
                state[1] += state[3] * dt;
            }
            MotionSpec::ConstantTurn { omega } => {
                let speed = state[2].hypot(state[3]);
                let heading = state[3].atan2(state[2]);
                let new_heading = heading + omega * dt;
                // exact arc when turning, straight line otherwise
                if omega.abs() > 1e-9 {
                    state[0] += speed / omega * (new_heading.sin() - heading.sin());
                    state[1] -= speed / omega * (new_heading.cos() - heading.cos());
                } else {
                    state[0] += state[2] * dt;
                    state[1] += state[3] * dt;
                }
                state[2] = speed * new_heading.cos();
                state[3] = speed * new_heading.sin();
            }
            MotionSpec::ConstantAccel { ax, ay } => {
                state[0] += state[2] * dt + 0.5 * ax * dt * dt;
                state[1] += state[3] * dt + 0.5 * ay * dt * dt;
                state[2] += ax * dt;
                state[3] += ay * dt;
            }
            MotionSpec::Segmented { segments } => {
                match segments.iter().filter(|(start, _)| *start <= t).last() {
                    Some((_, motion)) => motion.propagate(state, t, dt),
                    None => MotionSpec::ConstantVelocity.propagate(state, t, dt),
                }
            }
        }
    }

    /// Acceleration implied by this motion for the given state at time `t`.
    fn acceleration(&self, state: &[f64; 4], t: f64) -> (f64, f64) {
        match self {
            MotionSpec::ConstantVelocity => (0.0, 0.0),
            MotionSpec::ConstantTurn { omega } => (-omega * state[3], omega * state[2]),
            MotionSpec::ConstantAccel { ax, ay } => (*ax, *ay),
            MotionSpec::Segmented { segments } => {
                match segments.iter().filter(|(start, _)| *start <= t).last() {
                    Some((_, motion)) => motion.acceleration(state, t),
                    None => (0.0, 0.0),
                }
            }
        }
    }
}

/// A simulated target with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TruthTarget {
    pub id: TargetId,
    /// True state [px, py, vx, vy]
    pub state: [f64; 4],
    pub motion: MotionSpec,
    /// No reports before this time
    pub appear_at: Option<f64>,
    /// No reports from this time on
    pub disappear_at: Option<f64>,
}

impl TruthTarget {
    pub fn new(id: u32, pos: [f64; 2], vel: [f64; 2], motion: MotionSpec) -> Self {
        Self {
            id: TargetId(id),
            state: [pos[0], pos[1], vel[0], vel[1]],
            motion,
            appear_at: None,
            disappear_at: None,
        }
    }

    pub fn with_lifetime(mut self, appear_at: Option<f64>, disappear_at: Option<f64>) -> Self {
        self.appear_at = appear_at;
        self.disappear_at = disappear_at;
        self
    }

    /// Propagate the true state by `dt` seconds from time `t`.
    pub fn step(&mut self, t: f64, dt: f64) {
        self.motion.propagate(&mut self.state, t, dt);
    }

    /// True if the target produces reports at time `t`.
    pub fn is_active(&self, t: f64) -> bool {
        self.appear_at.map_or(true, |a| t >= a) && self.disappear_at.map_or(true, |d| t < d)
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }

    pub fn acceleration(&self, t: f64) -> (f64, f64) {
        self.motion.acceleration(&self.state, t)
    }

    /// Current truth, stamped `t`.
    pub fn sample(&self, t: f64) -> TruthSample {
        TruthSample {
            t,
            x: self.state[0],
            y: self.state[1],
            vx: self.state[2],
            vy: self.state[3],
        }
    }
}

/// Truth kinematics of one target at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruthSample {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

impl TruthSample {
    /// Linear blend towards `other` at time `t`.
    pub fn lerp(&self, other: &TruthSample, t: f64) -> TruthSample {
        let span = other.t - self.t;
        let f = if span > 0.0 { (t - self.t) / span } else { 0.0 };
        let mix = |a: f64, b: f64| a + f * (b - a);
        TruthSample {
            t,
            x: mix(self.x, other.x),
            y: mix(self.y, other.y),
            vx: mix(self.vx, other.vx),
            vy: mix(self.vy, other.vy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run(target: &mut TruthTarget, duration: f64, dt: f64) {
        let mut t = 0.0;
        while t < duration - 1e-9 {
            target.step(t, dt);
            t += dt;
        }
    }

    #[test]
    fn constant_velocity_moves_in_a_line() {
        let mut target =
            TruthTarget::new(1, [0.0, 0.0], [100.0, -50.0], MotionSpec::ConstantVelocity);
        run(&mut target, 10.0, 0.1);
        assert_abs_diff_eq!(target.state[0], 1000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(target.state[1], -500.0, epsilon = 1e-6);
    }

    #[test]
    fn turn_keeps_speed_and_closes_circle() {
        let omega = std::f64::consts::TAU / 100.0;
        let motion = MotionSpec::ConstantTurn { omega };
        let mut target = TruthTarget::new(1, [0.0, 0.0], [100.0, 0.0], motion);
        run(&mut target, 100.0, 0.5);
        let (vx, vy) = target.velocity();
        assert_abs_diff_eq!(vx.hypot(vy), 100.0, epsilon = 1e-6);
        assert_abs_diff_eq!(target.state[0], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(target.state[1], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn segmented_switches_at_start_time() {
        let motion = MotionSpec::Segmented {
            segments: vec![(5.0, Box::new(MotionSpec::ConstantAccel { ax: 2.0, ay: 0.0 }))],
        };
        let mut target = TruthTarget::new(1, [0.0, 0.0], [10.0, 0.0], motion);
        run(&mut target, 10.0, 1.0);
        // 5 s at 10 m/s, then 5 s accelerating at 2 m/s²
        assert_abs_diff_eq!(target.state[2], 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(target.state[0], 50.0 + 50.0 + 25.0, epsilon = 1e-9);
        assert_eq!(target.acceleration(6.0), (2.0, 0.0));
    }

    #[test]
    fn lifetime_bounds_activity() {
        let target = TruthTarget::new(1, [0.0, 0.0], [0.0, 0.0], MotionSpec::ConstantVelocity)
            .with_lifetime(Some(10.0), Some(20.0));
        assert!(!target.is_active(9.9));
        assert!(target.is_active(10.0));
        assert!(!target.is_active(20.0));
    }
}
