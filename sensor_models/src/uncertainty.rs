//! Default measurement uncertainties.
//!
//! Used whenever a measurement does not carry its own accuracy for a
//! component (e.g. a system track without velocity standard deviations).

use serde::{Deserialize, Serialize};

/// Variances assumed for measurement components lacking an accuracy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Uncertainty {
    /// Position variance per axis (m²)
    pub pos_var: f64,
    /// Velocity variance per axis (m²/s²)
    pub speed_var: f64,
    /// Acceleration variance per axis (m²/s⁴)
    pub acc_var: f64,
}

impl Default for Uncertainty {
    fn default() -> Self {
        Self {
            pos_var: 100.0,   // 10 m
            speed_var: 100.0, // 10 m/s
            acc_var: 100.0,   // 10 m/s²
        }
    }
}

impl Uncertainty {
    /// True if every variance is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        [self.pos_var, self.speed_var, self.acc_var]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}
