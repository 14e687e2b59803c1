//! Scenario definitions.
//!
//! Each scenario is a named configuration of truth targets, report streams
//! and slicing. All scenarios are deterministic given the same seed.

use crate::{
    report_sim::SimSensor,
    target::{MotionSpec, TruthTarget},
};
use recon_core::{
    config::{CONTENT_TYPE_ADSB, CONTENT_TYPE_SYSTEM_TRACK},
    StreamKey,
};
use serde::{Deserialize, Serialize};

/// Content type of plain radar plots.
pub const CONTENT_TYPE_RADAR: u32 = 48;

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 5 targets, ADS-B and radar, straight lines and one gentle turn
    Simple,
    /// 8 aircraft flying turn / accelerate / turn sequences
    Manoeuvring,
    /// 200 targets appearing and vanishing, three content types
    Dense,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub duration: f64, // seconds
    pub sim_dt: f64,   // truth propagation step (s)
    /// Length of one slice (s)
    pub slice_len: f64,
    /// Data each slice re-reads from before its begin (s)
    pub slice_overlap: f64,
    pub targets: Vec<TruthTarget>,
    pub sensors: Vec<SimSensor>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Simple => Self::simple(seed),
            ScenarioKind::Manoeuvring => Self::manoeuvring(seed),
            ScenarioKind::Dense => Self::dense(seed),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Simple
    // -----------------------------------------------------------------------
    fn simple(seed: u64) -> Self {
        let targets = vec![
            TruthTarget::new(1, [-20000., 0.], [150., 0.], MotionSpec::ConstantVelocity),
            TruthTarget::new(2, [0., -20000.], [0., 150.], MotionSpec::ConstantVelocity),
            TruthTarget::new(3, [10000., 10000.], [-80., -80.], MotionSpec::ConstantVelocity),
            TruthTarget::new(
                4,
                [-5000., 15000.],
                [100., -50.],
                MotionSpec::ConstantTurn { omega: 0.01 },
            ),
            TruthTarget::new(5, [15000., -5000.], [-50., 120.], MotionSpec::ConstantVelocity),
        ];

        Scenario {
            name: "simple".into(),
            seed,
            duration: 300.0,
            sim_dt: 0.1,
            slice_len: 60.0,
            slice_overlap: 30.0,
            targets,
            sensors: vec![adsb(1), radar(2, 4.0, 0.3)],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Manoeuvring
    // -----------------------------------------------------------------------
    /// 8 aircraft, each flying:
    ///
    /// ```text
    /// t=0-40s     straight at 200-270 m/s
    /// t=40-60s    hard turn (omega = ±0.1 rad/s)
    /// t=60-100s   straight
    /// t=100-120s  acceleration along track
    /// t=120-300s  slow turn, opposite sense
    /// ```
    fn manoeuvring(seed: u64) -> Self {
        let targets = (0..8u32)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 8.0;
                let speed = 200.0 + 10.0 * i as f64;
                let heading = angle + std::f64::consts::PI;
                let (hx, hy) = (heading.cos(), heading.sin());
                let sense = if i % 2 == 0 { 1.0 } else { -1.0 };
                let motion = segmented(vec![
                    (0.0, MotionSpec::ConstantVelocity),
                    (40.0, MotionSpec::ConstantTurn { omega: 0.1 * sense }),
                    (60.0, MotionSpec::ConstantVelocity),
                    (100.0, MotionSpec::ConstantAccel { ax: 5.0 * hx, ay: 5.0 * hy }),
                    (120.0, MotionSpec::ConstantTurn { omega: -0.02 * sense }),
                ]);
                TruthTarget::new(
                    i + 1,
                    [40000. * angle.cos(), 40000. * angle.sin()],
                    [speed * hx, speed * hy],
                    motion,
                )
            })
            .collect();

        Scenario {
            name: "manoeuvring".into(),
            seed,
            duration: 300.0,
            sim_dt: 0.05,
            slice_len: 60.0,
            slice_overlap: 30.0,
            targets,
            sensors: vec![adsb(1), radar(2, 4.0, 0.5), system_track(3)],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Dense
    // -----------------------------------------------------------------------
    fn dense(seed: u64) -> Self {
        use rand::prelude::*;
        use rand_chacha::ChaCha8Rng;
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));

        let duration = 600.0;
        let targets = (0..200u32)
            .map(|i| {
                let px = (rng.gen::<f64>() - 0.5) * 200_000.0;
                let py = (rng.gen::<f64>() - 0.5) * 200_000.0;
                let vx = (rng.gen::<f64>() - 0.5) * 400.0;
                let vy = (rng.gen::<f64>() - 0.5) * 400.0;
                let motion = if rng.gen::<f64>() < 0.3 {
                    MotionSpec::ConstantTurn {
                        omega: (rng.gen::<f64>() - 0.5) * 0.05,
                    }
                } else {
                    MotionSpec::ConstantVelocity
                };
                let appear = rng.gen::<f64>() * duration * 0.5;
                let disappear = appear + 60.0 + rng.gen::<f64>() * duration;
                TruthTarget::new(i + 1, [px, py], [vx, vy], motion)
                    .with_lifetime(Some(appear), (disappear < duration).then_some(disappear))
            })
            .collect();

        Scenario {
            name: "dense".into(),
            seed,
            duration,
            sim_dt: 0.1,
            slice_len: 120.0,
            slice_overlap: 60.0,
            targets,
            sensors: vec![adsb(1), radar(2, 5.0, 0.0), radar(4, 4.0, 2.0), system_track(3)],
        }
    }
}

// ---------------------------------------------------------------------------
// Builder helpers
// ---------------------------------------------------------------------------

fn segmented(segments: Vec<(f64, MotionSpec)>) -> MotionSpec {
    MotionSpec::Segmented {
        segments: segments.into_iter().map(|(t, m)| (t, Box::new(m))).collect(),
    }
}

fn adsb(sensor_id: u32) -> SimSensor {
    SimSensor::new(StreamKey::new(CONTENT_TYPE_ADSB, sensor_id, 0), 1.0, 0.95, 20.0)
        .with_velocity(3.0)
}

fn radar(sensor_id: u32, period: f64, phase: f64) -> SimSensor {
    SimSensor::new(StreamKey::new(CONTENT_TYPE_RADAR, sensor_id, 0), period, 0.9, 150.0)
        .with_phase(phase)
}

fn system_track(sensor_id: u32) -> SimSensor {
    SimSensor::new(StreamKey::new(CONTENT_TYPE_SYSTEM_TRACK, sensor_id, 0), 2.0, 1.0, 60.0)
        .with_velocity(8.0)
        .with_phase(0.7)
        .corrected()
}
