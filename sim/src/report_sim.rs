//! Report stream simulator.
//!
//! Generates per-stream measurements of the truth targets with:
//! - Uniform position noise around the true position
//! - Miss probability (1 - P_D)
//! - Optional noisy velocity (ADS-B / system track style reports)
//! - Stated accuracies matching the injected noise

use crate::target::TruthTarget;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use recon_core::{Measurement, SourceId, StreamKey, TargetId};
use sensor_models::{Kinematics2D, PositionAccuracy};
use serde::{Deserialize, Serialize};

/// One report stream in the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimSensor {
    pub stream: StreamKey,
    /// Seconds between two reports of the same target
    pub period: f64,
    pub p_detection: f64,
    /// Half-width of the uniform position noise (m)
    pub pos_noise: f64,
    /// Half-width of the uniform velocity noise (m/s); `None` = no velocity
    pub vel_noise: Option<f64>,
    /// Report accuracies were corrected upstream
    pub corrected: bool,
    /// Next scheduled report time
    pub next_report_time: f64,
}

impl SimSensor {
    pub fn new(stream: StreamKey, period: f64, p_detection: f64, pos_noise: f64) -> Self {
        Self {
            stream,
            period,
            p_detection,
            pos_noise,
            vel_noise: None,
            corrected: false,
            next_report_time: 0.0,
        }
    }

    pub fn with_velocity(mut self, vel_noise: f64) -> Self {
        self.vel_noise = Some(vel_noise);
        self
    }

    pub fn with_phase(mut self, first_report: f64) -> Self {
        self.next_report_time = first_report;
        self
    }

    pub fn corrected(mut self) -> Self {
        self.corrected = true;
        self
    }

    pub fn should_report(&self, t: f64) -> bool {
        t >= self.next_report_time
    }

    pub fn advance_schedule(&mut self) {
        self.next_report_time += self.period;
    }
}

/// A measurement of one target on one stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    pub target: TargetId,
    pub stream: StreamKey,
    pub measurement: Measurement,
}

/// Generates report batches from a set of truth targets.
pub struct ReportSimulator {
    pub sensors: Vec<SimSensor>,
    rng: ChaCha8Rng,
    next_source_id: u64,
}

impl ReportSimulator {
    pub fn new(sensors: Vec<SimSensor>, seed: u64) -> Self {
        Self {
            sensors,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_source_id: 1,
        }
    }

    /// Generate every report due at or before `sim_time`.
    ///
    /// Truth is extrapolated back from `sim_time` to the scheduled report
    /// time so that reports are exact up to the injected noise.
    pub fn generate_reports(&mut self, targets: &[TruthTarget], sim_time: f64) -> Vec<SimReport> {
        let mut reports = Vec::new();

        for sensor in &mut self.sensors {
            while sensor.should_report(sim_time) {
                let report_time = sensor.next_report_time;
                sensor.advance_schedule();

                for target in targets {
                    if !target.is_active(report_time) {
                        continue;
                    }
                    if self.rng.gen::<f64>() > sensor.p_detection {
                        continue;
                    }

                    let back = sim_time - report_time;
                    let (vx, vy) = target.velocity();
                    let (px, py) = target.position();
                    let x = px - vx * back + noise(&mut self.rng, sensor.pos_noise);
                    let y = py - vy * back + noise(&mut self.rng, sensor.pos_noise);

                    let source_id = SourceId(self.next_source_id);
                    self.next_source_id += 1;

                    // stddev of a uniform distribution on [-w, w]
                    let pos_std = sensor.pos_noise / 3f64.sqrt();
                    let mut mm = Measurement::new(report_time, source_id, x, y)
                        .with_accuracy(PositionAccuracy::new(pos_std, pos_std, 0.0));
                    if let Some(vel_noise) = sensor.vel_noise {
                        let vel_std = vel_noise / 3f64.sqrt();
                        mm = mm.with_velocity(
                            Kinematics2D::new(
                                vx + noise(&mut self.rng, vel_noise),
                                vy + noise(&mut self.rng, vel_noise),
                            )
                            .with_stddev(vel_std, vel_std),
                        );
                    }
                    mm.corrected = sensor.corrected;

                    reports.push(SimReport {
                        target: target.id,
                        stream: sensor.stream,
                        measurement: mm,
                    });
                }
            }
        }

        reports
    }
}

/// Uniform noise on `[-half_width, half_width]`.
fn noise(rng: &mut ChaCha8Rng, half_width: f64) -> f64 {
    rng.gen::<f64>() * half_width * 2.0 - half_width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MotionSpec;

    fn target() -> TruthTarget {
        TruthTarget::new(3, [1000.0, 0.0], [100.0, 0.0], MotionSpec::ConstantVelocity)
    }

    #[test]
    fn reports_follow_schedule_and_noise_bounds() {
        let sensor = SimSensor::new(StreamKey::new(21, 1, 0), 1.0, 1.0, 10.0).with_velocity(2.0);
        let mut sim = ReportSimulator::new(vec![sensor], 7);
        let reports = sim.generate_reports(&[target()], 2.5);

        // due at 0, 1 and 2
        let times: Vec<f64> = reports.iter().map(|r| r.measurement.t).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
        for r in &reports {
            let truth_x = 1000.0 + 100.0 * (r.measurement.t - 2.5);
            assert!((r.measurement.x - truth_x).abs() <= 10.0);
            assert!(r.measurement.y.abs() <= 10.0);
            let v = r.measurement.velocity.expect("velocity reported");
            assert!((v.x - 100.0).abs() <= 2.0);
            assert_eq!(r.target, TargetId(3));
        }
    }

    #[test]
    fn source_ids_are_unique() {
        let sensors = vec![
            SimSensor::new(StreamKey::new(21, 1, 0), 1.0, 1.0, 10.0),
            SimSensor::new(StreamKey::new(48, 2, 0), 2.0, 1.0, 50.0),
        ];
        let mut sim = ReportSimulator::new(sensors, 7);
        let mut ids: Vec<_> = sim
            .generate_reports(&[target()], 10.0)
            .iter()
            .filter_map(|r| r.measurement.source_id)
            .collect();
        let n = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), n);
        assert_eq!(n, 11 + 6);
    }

    #[test]
    fn same_seed_same_reports() {
        let make = || {
            let sensor = SimSensor::new(StreamKey::new(21, 1, 0), 1.0, 0.7, 10.0);
            ReportSimulator::new(vec![sensor], 99).generate_reports(&[target()], 20.0)
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn inactive_targets_are_not_reported() {
        let sensor = SimSensor::new(StreamKey::new(21, 1, 0), 1.0, 1.0, 10.0);
        let mut sim = ReportSimulator::new(vec![sensor], 1);
        let late = target().with_lifetime(Some(5.0), None);
        let reports = sim.generate_reports(&[late], 6.0);
        let times: Vec<f64> = reports.iter().map(|r| r.measurement.t).collect();
        assert_eq!(times, vec![5.0, 6.0]);
    }
}
