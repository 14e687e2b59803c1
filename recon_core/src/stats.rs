//! Reconstruction counters: per target within a slice, and folded totals.

use crate::error::KalmanError;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Per-target counters for one slice. Reset before every slice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCounts {
    /// Attempted filter steps
    pub num_updates: u64,
    pub num_updates_valid: u64,
    pub num_updates_failed: u64,
    pub num_updates_failed_numeric: u64,
    pub num_updates_failed_badstate: u64,
    pub num_updates_failed_other: u64,
    /// Steps skipped for being too close in time
    pub num_updates_skipped: u64,
    /// Successful steps that had to reinitialize after a failure
    pub num_updates_raf: u64,
    pub num_updates_raf_numeric: u64,
    pub num_updates_raf_badstate: u64,
    pub num_updates_raf_other: u64,
    /// Stepped measurements with upstream-corrected accuracy
    pub num_updates_ccoeff_corr: u64,
    /// Whole-target smoothing failures
    pub num_smoothing_failed: u64,
    /// Smoothed samples dropped as invalid
    pub num_smooth_steps_failed: u64,
    /// Resampled samples that could not be interpolated
    pub num_interp_steps_failed: u64,
}

impl UpdateCounts {
    pub fn record_failure(&mut self, cause: KalmanError) {
        self.num_updates_failed += 1;
        match cause {
            KalmanError::Numeric => self.num_updates_failed_numeric += 1,
            KalmanError::InvalidState => self.num_updates_failed_badstate += 1,
            KalmanError::Other => self.num_updates_failed_other += 1,
        }
    }

    pub fn record_reinit_after_fail(&mut self, cause: KalmanError) {
        self.num_updates_raf += 1;
        match cause {
            KalmanError::Numeric => self.num_updates_raf_numeric += 1,
            KalmanError::InvalidState => self.num_updates_raf_badstate += 1,
            KalmanError::Other => self.num_updates_raf_other += 1,
        }
    }

    /// Every attempted step is either valid, failed or skipped.
    pub fn is_consistent(&self) -> bool {
        self.num_updates
            == self.num_updates_valid + self.num_updates_failed + self.num_updates_skipped
    }
}

impl AddAssign for UpdateCounts {
    fn add_assign(&mut self, o: Self) {
        self.num_updates += o.num_updates;
        self.num_updates_valid += o.num_updates_valid;
        self.num_updates_failed += o.num_updates_failed;
        self.num_updates_failed_numeric += o.num_updates_failed_numeric;
        self.num_updates_failed_badstate += o.num_updates_failed_badstate;
        self.num_updates_failed_other += o.num_updates_failed_other;
        self.num_updates_skipped += o.num_updates_skipped;
        self.num_updates_raf += o.num_updates_raf;
        self.num_updates_raf_numeric += o.num_updates_raf_numeric;
        self.num_updates_raf_badstate += o.num_updates_raf_badstate;
        self.num_updates_raf_other += o.num_updates_raf_other;
        self.num_updates_ccoeff_corr += o.num_updates_ccoeff_corr;
        self.num_smoothing_failed += o.num_smoothing_failed;
        self.num_smooth_steps_failed += o.num_smooth_steps_failed;
        self.num_interp_steps_failed += o.num_interp_steps_failed;
    }
}

/// Totals of one or more slices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionStats {
    /// Slices processed
    pub num_slices: u64,
    /// Targets handled in the fan-out
    pub num_targets: u64,
    /// Measurements that reached the filter input buffers
    pub num_measurements: u64,
    /// References published to target entities
    pub num_references: u64,
    pub counts: UpdateCounts,
}

impl AddAssign for ReconstructionStats {
    fn add_assign(&mut self, o: Self) {
        self.num_slices += o.num_slices;
        self.num_targets += o.num_targets;
        self.num_measurements += o.num_measurements;
        self.num_references += o.num_references;
        self.counts += o.counts;
    }
}
