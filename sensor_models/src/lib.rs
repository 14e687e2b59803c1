//! `sensor_models`: Observation models and default uncertainties for the
//! reconstruction filters.
//!
//! The filter state is always the 2D kinematic vector
//! `[px, py, vx, vy, ax, ay]`; see [`state`] for the index layout.

pub mod observation;
pub mod uncertainty;

pub use observation::{CartesianObservation, Kinematics2D, ObservationModel, PositionAccuracy};
pub use uncertainty::Uncertainty;

/// State vector layout shared by every filter in the workspace.
pub mod state {
    /// Dimension of the kinematic state vector.
    pub const DIM: usize = 6;

    pub const PX: usize = 0;
    pub const PY: usize = 1;
    pub const VX: usize = 2;
    pub const VY: usize = 3;
    pub const AX: usize = 4;
    pub const AY: usize = 5;
}
