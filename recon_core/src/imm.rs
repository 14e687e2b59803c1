//! Interacting Multiple Models (IMM) filter.
//!
//! Maintains a bank of linear Kalman filters and a probability vector μ over
//! models.
//!
//! Model bank (2 models):
//! 1. Uniform:     constant velocity, for straight flight.
//! 2. Accelerated: constant acceleration, for speed changes and turns.

use crate::{
    error::KalmanError,
    kf::{KalmanFilter, LinearKalmanFilter, MotionModel},
    types::{StateCov, StateVec},
};
use sensor_models::observation::{DMat, DVec};

const N_MODELS: usize = 2;

/// Floor applied to probabilities and normalizers.
const PROB_FLOOR: f64 = 1e-30;

/// One filter of the bank with its own estimate and model probability.
#[derive(Clone, Debug)]
pub struct ImmModel {
    pub filter: LinearKalmanFilter,
    pub prob: f64,
    pub state: StateVec,
    pub cov: StateCov,
}

#[derive(Clone, Debug)]
pub struct ImmState {
    pub models: [ImmModel; N_MODELS],
    /// Markov switching matrix, `transition[from][to]`
    pub transition: [[f64; N_MODELS]; N_MODELS],
    /// Probability-weighted combination of the bank
    pub fused_state: StateVec,
    pub fused_cov: StateCov,
}

/// Moment-matched Gaussian mixture of `(weight, state, cov)` components.
fn mixture<'a>(
    components: impl Iterator<Item = (f64, &'a StateVec, &'a StateCov)> + Clone,
) -> (StateVec, StateCov) {
    let mean = components
        .clone()
        .fold(StateVec::zeros(), |acc, (w, x, _)| acc + x * w);
    let cov = components.fold(StateCov::zeros(), |acc, (w, x, p)| {
        let spread = x - mean;
        acc + (p + spread * spread.transpose()) * w
    });
    (mean, cov)
}

impl ImmState {
    /// Bank started from one estimate, both models equally likely.
    pub fn new(state: StateVec, cov: StateCov, switch_prob: f64) -> Self {
        let stay = 1.0 - switch_prob;
        let model = |motion| ImmModel {
            filter: LinearKalmanFilter::new(motion),
            prob: 1.0 / N_MODELS as f64,
            state,
            cov,
        };
        Self {
            models: [model(MotionModel::Uniform), model(MotionModel::Accelerated)],
            transition: [[stay, switch_prob], [switch_prob, stay]],
            fused_state: state,
            fused_cov: cov,
        }
    }

    fn probs(&self) -> [f64; N_MODELS] {
        std::array::from_fn(|i| self.models[i].prob)
    }

    /// Predicted model probabilities `c_j = sum_i p_ij mu_i`.
    fn predicted_probs(&self) -> [f64; N_MODELS] {
        let mu = self.probs();
        std::array::from_fn(|to| {
            (0..N_MODELS)
                .map(|from| self.transition[from][to] * mu[from])
                .sum::<f64>()
                .max(PROB_FLOOR)
        })
    }

    /// Mixed initial conditions, one per target model.
    fn mixed_estimates(&self, predicted: &[f64; N_MODELS]) -> [(StateVec, StateCov); N_MODELS] {
        std::array::from_fn(|to| {
            let weights = self.models.iter().enumerate().map(move |(from, m)| {
                (self.transition[from][to] * m.prob / predicted[to], &m.state, &m.cov)
            });
            mixture(weights)
        })
    }

    pub fn predict(&mut self, dt: f64, q_var: f64) {
        let predicted = self.predicted_probs();
        let mixed = self.mixed_estimates(&predicted);

        for ((model, (x, p)), prob) in self.models.iter_mut().zip(mixed).zip(predicted) {
            let (state, cov) = model.filter.predict(&x, &p, dt, q_var);
            model.state = state;
            model.cov = cov;
            model.prob = prob;
        }
        self.renormalize();
        self.combine();
    }

    /// Update every model; on error the state is left untouched.
    pub fn update(&mut self, z: &DVec, h: &DMat, r: &DMat) -> Result<(), KalmanError> {
        let [uniform, accelerated] = &self.models;
        let results = [
            uniform.filter.update(&uniform.state, &uniform.cov, z, h, r)?,
            accelerated.filter.update(&accelerated.state, &accelerated.cov, z, h, r)?,
        ];

        // posterior weight: likelihood times prior
        let weighted: [f64; N_MODELS] = std::array::from_fn(|j| {
            gaussian_likelihood(&results[j].innovation, &results[j].innovation_cov)
                * self.models[j].prob
        });
        let evidence = weighted.iter().sum::<f64>().max(PROB_FLOOR);

        for ((model, res), w) in self.models.iter_mut().zip(results).zip(weighted) {
            model.prob = (w / evidence).max(1e-10);
            model.state = res.state;
            model.cov = res.cov;
        }
        self.renormalize();
        self.combine();
        Ok(())
    }

    fn combine(&mut self) {
        let (x, p) = mixture(self.models.iter().map(|m| (m.prob, &m.state, &m.cov)));
        self.fused_state = x;
        self.fused_cov = p;
    }

    fn renormalize(&mut self) {
        let total = self.probs().iter().sum::<f64>().max(PROB_FLOOR);
        self.models.iter_mut().for_each(|m| m.prob /= total);
    }

    /// Most probable motion model.
    pub fn dominant_model(&self) -> MotionModel {
        self.models
            .iter()
            .max_by(|a, b| a.prob.total_cmp(&b.prob))
            .map_or(MotionModel::Uniform, |m| m.filter.model)
    }
}

/// Density of the innovation under N(0, S); floored for degenerate S.
fn gaussian_likelihood(innovation: &DVec, s: &DMat) -> f64 {
    let det = s.determinant();
    if det.is_nan() || det.abs() < PROB_FLOOR {
        return PROB_FLOOR;
    }
    let Some(s_inv) = s.clone().try_inverse() else {
        return PROB_FLOOR;
    };
    let mahalanobis_sq = innovation.dot(&(&s_inv * innovation));
    let norm = (std::f64::consts::TAU.powi(innovation.len() as i32) * det.abs()).sqrt();
    (-0.5 * mahalanobis_sq).exp() / norm
}
