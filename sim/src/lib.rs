//! `sim`: Scenario simulator and slice session driver.
//!
//! Generates ground truth and noisy report streams, replays them through the
//! reference calculator in overlapping slices and scores the result.

pub mod accuracy;
pub mod report_sim;
pub mod scenarios;
pub mod session;
pub mod target;

pub use accuracy::AccuracyMetrics;
pub use report_sim::{ReportSimulator, SimReport, SimSensor};
pub use scenarios::{Scenario, ScenarioKind};
pub use session::{simulate, SimulationLog, SliceSession};
pub use target::{MotionSpec, TruthSample, TruthTarget};
