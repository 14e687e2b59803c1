//! Measurement resampling before filtering.

use crate::{config::InterpOptions, types::Measurement};
use sensor_models::{Kinematics2D, PositionAccuracy};

/// Speeds below this are blended component-wise instead of polar.
const MIN_POLAR_SPEED: f64 = 1e-7;

/// Resamples a sorted measurement sequence of one report stream.
pub trait MeasurementInterpolator: Send + Sync {
    /// Returns the resampled sequence, or an empty vector if the input
    /// cannot be resampled.
    fn interpolate(
        &self,
        measurements: &[Measurement],
        options: &InterpOptions,
    ) -> Vec<Measurement>;
}

/// Piecewise linear resampling at a fixed interval.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    /// Split where consecutive measurements are more than `max_dt` apart.
    fn split(measurements: &[Measurement], max_dt: f64) -> Vec<&[Measurement]> {
        let mut parts = Vec::new();
        let mut begin = 0;
        for i in 1..measurements.len() {
            if measurements[i].t - measurements[i - 1].t > max_dt {
                parts.push(&measurements[begin..i]);
                begin = i;
            }
        }
        if begin < measurements.len() {
            parts.push(&measurements[begin..]);
        }
        parts
    }

    fn interpolate_part(part: &[Measurement], options: &InterpOptions, out: &mut Vec<Measurement>) {
        let Some(first) = part.first() else {
            return;
        };
        let start = out.len();
        out.push(first.clone());

        let mut tcur = first.t + options.sample_dt;
        for pair in part.windows(2) {
            let (m0, m1) = (&pair[0], &pair[1]);
            let dt01 = m1.t - m0.t;

            while tcur >= m0.t && tcur < m1.t {
                if dt01 < options.min_dt {
                    out.push(m1.clone());
                    // next grid point after m1
                    while tcur <= m1.t {
                        tcur += options.sample_dt;
                    }
                    break;
                }
                let f = (tcur - m0.t) / dt01;
                out.push(interp_measurement(m0, m1, tcur, f, options.q_var));
                tcur += options.sample_dt;
            }
        }

        if let Some(last) = part.last() {
            if out[start..].last().map_or(true, |m| m.t < last.t) {
                out.push(last.clone());
            }
        }
    }
}

impl MeasurementInterpolator for LinearInterpolator {
    fn interpolate(
        &self,
        measurements: &[Measurement],
        options: &InterpOptions,
    ) -> Vec<Measurement> {
        let mut out = Vec::new();
        for part in Self::split(measurements, options.max_dt) {
            Self::interpolate_part(part, options, &mut out);
        }
        out
    }
}

fn lerp(v0: f64, v1: f64, f: f64) -> f64 {
    (1.0 - f) * v0 + f * v1
}

/// Interpolated standard deviation, blending variances.
fn lerp_stddev(s0: f64, s1: f64, f: f64) -> f64 {
    lerp(s0 * s0, s1 * s1, f).sqrt()
}

/// Blend two kinematic vectors; speed and heading separately where both
/// vectors have a usable direction.
fn interp_vector(k0: &Kinematics2D, k1: &Kinematics2D, f: f64) -> Kinematics2D {
    let (s0, s1) = (k0.norm(), k1.norm());
    let (x, y) = if s0 < MIN_POLAR_SPEED || s1 < MIN_POLAR_SPEED {
        (lerp(k0.x, k1.x, f), lerp(k0.y, k1.y, f))
    } else {
        let a0 = k0.y.atan2(k0.x);
        let a1 = k1.y.atan2(k1.x);
        let mut da = a1 - a0;
        if da > std::f64::consts::PI {
            da -= std::f64::consts::TAU;
        } else if da < -std::f64::consts::PI {
            da += std::f64::consts::TAU;
        }
        let speed = lerp(s0, s1, f);
        let angle = a0 + f * da;
        (speed * angle.cos(), speed * angle.sin())
    };
    let stddev = match (k0.stddev, k1.stddev) {
        (Some([x0, y0]), Some([x1, y1])) => {
            Some([lerp_stddev(x0, x1, f), lerp_stddev(y0, y1, f)])
        }
        _ => None,
    };
    Kinematics2D { x, y, stddev }
}

fn interp_accuracy(a0: &PositionAccuracy, a1: &PositionAccuracy, f: f64) -> PositionAccuracy {
    PositionAccuracy::new(
        lerp_stddev(a0.x_stddev, a1.x_stddev, f),
        lerp_stddev(a0.y_stddev, a1.y_stddev, f),
        lerp(a0.xy_cov, a1.xy_cov, f),
    )
}

/// Measurement at `t`, a fraction `f` of the way from `m0` to `m1`.
fn interp_measurement(
    m0: &Measurement,
    m1: &Measurement,
    t: f64,
    f: f64,
    q_var: Option<f64>,
) -> Measurement {
    if f <= 0.0 {
        return m0.clone();
    }
    if f >= 1.0 {
        return m1.clone();
    }

    let both = |a: Option<Kinematics2D>, b: Option<Kinematics2D>| match (a, b) {
        (Some(a), Some(b)) => Some(interp_vector(&a, &b, f)),
        _ => None,
    };

    Measurement {
        t,
        // the source of the earlier neighbour
        source_id: m0.source_id,
        x: lerp(m0.x, m1.x, f),
        y: lerp(m0.y, m1.y, f),
        accuracy: match (m0.accuracy, m1.accuracy) {
            (Some(a0), Some(a1)) => Some(interp_accuracy(&a0, &a1, f)),
            (a0, a1) => a0.or(a1),
        },
        velocity: both(m0.velocity, m1.velocity),
        acceleration: both(m0.acceleration, m1.acceleration),
        corrected: m0.corrected && m1.corrected,
        interpolated: true,
        q_var_interp: q_var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceId;
    use approx::assert_abs_diff_eq;

    fn mm(t: f64, id: u64, x: f64) -> Measurement {
        Measurement::new(t, SourceId(id), x, 0.0)
    }

    fn times(mms: &[Measurement]) -> Vec<f64> {
        mms.iter().map(|m| m.t).collect()
    }

    #[test]
    fn resamples_on_grid_and_keeps_last() {
        let input = vec![mm(0.0, 1, 0.0), mm(4.0, 2, 40.0), mm(5.0, 3, 50.0)];
        let opts = InterpOptions::new(2.0, 30.0);
        let out = LinearInterpolator.interpolate(&input, &opts);

        assert_eq!(times(&out), vec![0.0, 2.0, 4.0, 5.0]);
        assert!(!out[0].interpolated);
        assert!(out[1].interpolated);
        assert_abs_diff_eq!(out[1].x, 20.0);
        assert_eq!(out[1].source_id, Some(SourceId(1)));
        // grid point on an original sample reuses it
        assert!(!out[2].interpolated);
        assert_eq!(out[3].source_id, Some(SourceId(3)));
    }

    #[test]
    fn splits_at_large_gaps() {
        let input = vec![
            mm(0.0, 1, 0.0),
            mm(1.0, 2, 10.0),
            mm(100.0, 3, 0.0),
            mm(101.5, 4, 15.0),
        ];
        let out = LinearInterpolator.interpolate(&input, &InterpOptions::new(1.0, 10.0));
        assert_eq!(times(&out), vec![0.0, 1.0, 100.0, 101.0, 101.5]);
        // nothing is interpolated across the gap
        assert!(out[..2].iter().all(|m| !m.interpolated));
    }

    #[test]
    fn close_neighbours_emit_second_sample() {
        let input = vec![mm(0.0, 1, 0.0), mm(1.0, 2, 10.0), mm(1.0005, 3, 10.0), mm(3.0, 4, 30.0)];
        let out = LinearInterpolator.interpolate(&input, &InterpOptions::new(1.0, 30.0));
        assert_eq!(out[1].source_id, Some(SourceId(3)));
        assert!(!out[1].interpolated);
        assert_abs_diff_eq!(out[2].t, 2.0);
        assert_eq!(out.last().map(|m| m.t), Some(3.0));
    }

    #[test]
    fn grid_continues_after_close_pair_with_fine_sampling() {
        let input = vec![
            mm(0.0, 1, 0.0),
            mm(1.0, 2, 10.0),
            mm(1.8, 3, 18.0),
            mm(5.0, 4, 50.0),
            mm(10.0, 5, 100.0),
        ];
        let mut opts = InterpOptions::new(0.5, 30.0);
        opts.min_dt = 1.0;
        let out = LinearInterpolator.interpolate(&input, &opts);

        let mut expected = vec![0.0, 0.5, 1.8];
        expected.extend((4..=20).map(|i| i as f64 * 0.5));
        assert_eq!(times(&out), expected);
        assert_eq!(out[2].source_id, Some(SourceId(3)));
        assert_abs_diff_eq!(out[3].x, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn synthesized_samples_carry_process_noise_override() {
        let input = vec![mm(0.0, 1, 0.0), mm(2.0, 2, 20.0)];
        let mut opts = InterpOptions::new(1.0, 30.0);
        opts.q_var = Some(25.0);
        let out = LinearInterpolator.interpolate(&input, &opts);
        assert_eq!(out[1].q_var_interp, Some(25.0));
        assert_eq!(out[0].q_var_interp, None);
    }

    #[test]
    fn velocity_interpolates_heading() {
        let v0 = Kinematics2D::new(100.0, 0.0);
        let v1 = Kinematics2D::new(0.0, 100.0);
        let v = interp_vector(&v0, &v1, 0.5);
        assert_abs_diff_eq!(v.norm(), 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(v.x, v.y, epsilon = 1e-9);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(LinearInterpolator
            .interpolate(&[], &InterpOptions::default())
            .is_empty());
    }
}
