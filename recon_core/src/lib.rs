//! `recon_core`: Incremental multi-target reference reconstruction.
//!
//! # Module layout
//! - [`types`]: Fundamental types (IDs, measurements, updates, references)
//! - [`config`]: Calculator, estimator and resampling settings
//! - [`error`]: Filter and configuration errors
//! - [`kf`]: Linear Kalman filter (predict / update / RTS step)
//! - [`imm`]: Two-model IMM over uniform and accelerated motion
//! - [`estimator`]: Estimator contract and the reference Kalman estimator
//! - [`interp`]: Measurement resampling before filtering
//! - [`slice`]: Slice windows and history purging
//! - [`target`]: Target entities and per-target working sets
//! - [`engine`]: Init / resume / step state machine
//! - [`smoothing`]: Backward smoothing stage
//! - [`resample`]: Uniform resampling stage
//! - [`calculator`]: Per-slice orchestration and publication
//! - [`stats`]: Per-target counters and folded totals
//! - [`annotations`]: Debug annotation sinks

pub mod annotations;
pub mod calculator;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod imm;
pub mod interp;
pub mod kf;
pub mod resample;
pub mod slice;
pub mod smoothing;
pub mod stats;
pub mod target;
pub mod types;

pub use calculator::ReferenceCalculator;
pub use config::{FilterKind, InterpOptions, ReferenceCalculatorSettings};
pub use error::{ConfigError, KalmanError};
pub use estimator::{Estimator, EstimatorFactory, KalmanEstimator, StepOutcome};
pub use slice::SliceWindow;
pub use stats::{ReconstructionStats, UpdateCounts};
pub use target::{ReconTarget, TargetReferences};
pub use types::{
    KalmanUpdate, Measurement, Reference, SourceId, StateCov, StateVec, StreamKey, TargetId,
};
