//! Reconstruction settings.
//!
//! Every struct is `Default` and `#[serde(default)]`, so a settings file only
//! needs to name the values it changes.

use crate::{
    error::ConfigError,
    types::{SourceId, TargetId},
};
use sensor_models::Uncertainty;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};

/// ADS-B report content type.
pub const CONTENT_TYPE_ADSB: u32 = 21;
/// System track content type.
pub const CONTENT_TYPE_SYSTEM_TRACK: u32 = 62;

// ---------------------------------------------------------------------------
// Filter selection
// ---------------------------------------------------------------------------

/// Motion model family of the estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Constant velocity
    Uniform,
    /// Constant acceleration
    Accelerated,
    /// Interacting multiple models over uniform and accelerated
    #[default]
    Imm,
}

impl FilterKind {
    /// Kind used to resample a finished trajectory.
    pub fn resample_kind(self) -> Self {
        match self {
            FilterKind::Imm => FilterKind::Accelerated,
            other => other,
        }
    }
}

impl FromStr for FilterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(FilterKind::Uniform),
            "accelerated" => Ok(FilterKind::Accelerated),
            "imm" => Ok(FilterKind::Imm),
            _ => Err(ConfigError::UnknownFilterKind(s.to_string())),
        }
    }
}

/// Reaction to a numerically failing filter step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepFailStrategy {
    /// Reject the step, keep the last valid state
    #[default]
    ReturnInvalid,
    /// Reinitialize from the measurement and report success
    Reinit,
}

/// Reaction to a numerically bad smoothed state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothFailStrategy {
    /// Mark the sample invalid and carry on
    #[default]
    SetInvalid,
    /// Fail the whole pass
    Stop,
}

/// Blend factor used when interpolating between two filter updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateInterpMode {
    /// Proportional to elapsed time
    BlendLinear,
    /// Weighted by predicted position std dev
    BlendStdDev,
    /// Weighted by predicted position variance
    #[default]
    BlendVar,
    /// Plain average
    BlendHalf,
}

// ---------------------------------------------------------------------------
// Estimator settings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Process noise variance
    pub q_var: f64,
    /// Variance assumed for unobserved state components at init
    pub r_var_undef: f64,
    /// Default measurement uncertainties
    pub uncert: Uncertainty,
    /// Steps closer than this are skipped (s)
    pub min_dt: f64,
    /// Steps further apart reinitialize the filter (s)
    pub max_dt: f64,
    pub reinit_check_time: bool,
    pub reinit_check_distance: bool,
    /// Jump distance that reinitializes the filter (m)
    pub max_distance_cart: f64,
    pub step_fail_strategy: StepFailStrategy,
    /// Scale applied to the RTS gain
    pub smoothing_scale: f64,
    /// Resampling interval (s)
    pub resample_dt: f64,
    /// Process noise variance used while resampling
    pub resample_q_var: f64,
    pub resample_interp_mode: StateInterpMode,
    /// IMM probability of switching model between two steps
    pub imm_switch_prob: f64,
    pub track_velocities: bool,
    pub track_accelerations: bool,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            q_var: 900.0,
            r_var_undef: 1e6,
            uncert: Uncertainty::default(),
            min_dt: 1e-3,
            max_dt: 11.0,
            reinit_check_time: true,
            reinit_check_distance: false,
            max_distance_cart: 50_000.0,
            step_fail_strategy: StepFailStrategy::default(),
            smoothing_scale: 1.0,
            resample_dt: 2.0,
            resample_q_var: 100.0,
            resample_interp_mode: StateInterpMode::default(),
            imm_switch_prob: 0.05,
            track_velocities: true,
            track_accelerations: true,
        }
    }
}

impl EstimatorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("estimator.q_var", self.q_var)?;
        positive("estimator.r_var_undef", self.r_var_undef)?;
        positive("estimator.min_dt", self.min_dt)?;
        positive("estimator.max_dt", self.max_dt)?;
        positive("estimator.max_distance_cart", self.max_distance_cart)?;
        positive("estimator.smoothing_scale", self.smoothing_scale)?;
        positive("estimator.resample_dt", self.resample_dt)?;
        positive("estimator.resample_q_var", self.resample_q_var)?;
        if !self.uncert.is_valid() {
            return Err(ConfigError::invalid(
                "estimator.uncert",
                "variances must be finite and positive",
            ));
        }
        if self.min_dt >= self.max_dt {
            return Err(ConfigError::invalid(
                "estimator.min_dt",
                format!("must be below max_dt ({})", self.max_dt),
            ));
        }
        if !(0.0..1.0).contains(&self.imm_switch_prob) {
            return Err(ConfigError::invalid(
                "estimator.imm_switch_prob",
                "must lie in [0, 1)",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Measurement resampling
// ---------------------------------------------------------------------------

/// Resampling options for one report content type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpOptions {
    /// Output interval (s)
    pub sample_dt: f64,
    /// Gaps above this split the sequence (s)
    pub max_dt: f64,
    /// Neighbours closer than this are not interpolated (s)
    pub min_dt: f64,
    /// Process noise variance assigned to synthesized samples
    pub q_var: Option<f64>,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            sample_dt: 1.0,
            max_dt: 30.0,
            min_dt: 1e-3,
            q_var: None,
        }
    }
}

impl InterpOptions {
    pub fn new(sample_dt: f64, max_dt: f64) -> Self {
        Self {
            sample_dt,
            max_dt,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("measurement_resampling.sample_dt", self.sample_dt)?;
        positive("measurement_resampling.max_dt", self.max_dt)?;
        positive("measurement_resampling.min_dt", self.min_dt)?;
        match self.q_var {
            Some(q) => positive("measurement_resampling.q_var", q),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Debug selectors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub enabled: bool,
    /// Targets that get an annotation sink
    pub targets: Vec<TargetId>,
    /// Source records of selected targets logged when stepped
    pub source_ids: Vec<SourceId>,
    /// Steps of selected targets inside this window are logged
    pub time_window: Option<(f64, f64)>,
}

impl DebugSettings {
    pub fn debug_target(&self, id: TargetId) -> bool {
        self.enabled && self.targets.contains(&id)
    }

    /// Whether a step on this measurement of a selected target is logged:
    /// its record is selected or it lies inside the time window.
    pub fn debug_measurement(
        &self,
        target_selected: bool,
        source: Option<SourceId>,
        t: f64,
    ) -> bool {
        if !target_selected {
            return false;
        }
        let by_source = source.map_or(false, |id| self.source_ids.contains(&id));
        let by_time = self
            .time_window
            .map_or(false, |(begin, end)| t >= begin && t <= end);
        by_source || by_time
    }
}

// ---------------------------------------------------------------------------
// Calculator settings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceCalculatorSettings {
    pub filter_kind: FilterKind,
    pub estimator: EstimatorSettings,
    /// Run the backward RTS pass
    pub smooth_rts: bool,
    /// Resample the final trajectory at `estimator.resample_dt`
    pub resample_result: bool,
    /// Per content type measurement resampling
    pub measurement_resampling: BTreeMap<u32, InterpOptions>,
    /// Fan targets out on the rayon pool
    pub multithreading: bool,
    /// Slices past this index are not processed
    pub max_slice_index: Option<usize>,
    /// Restrict input to `compat_content_types`
    pub compat_mode: bool,
    pub compat_content_types: Vec<u32>,
    pub debug: DebugSettings,
}

impl Default for ReferenceCalculatorSettings {
    fn default() -> Self {
        Self {
            filter_kind: FilterKind::default(),
            estimator: EstimatorSettings::default(),
            smooth_rts: true,
            resample_result: false,
            measurement_resampling: BTreeMap::new(),
            multithreading: true,
            max_slice_index: None,
            compat_mode: false,
            compat_content_types: vec![CONTENT_TYPE_ADSB, CONTENT_TYPE_SYSTEM_TRACK],
            debug: DebugSettings::default(),
        }
    }
}

impl ReferenceCalculatorSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.estimator.validate()?;
        for opts in self.measurement_resampling.values() {
            opts.validate()?;
        }
        if let Some((begin, end)) = self.debug.time_window {
            if begin.is_nan() || end.is_nan() || begin > end {
                return Err(ConfigError::invalid(
                    "debug.time_window",
                    "begin must not exceed end",
                ));
            }
        }
        Ok(())
    }

    /// True if streams of this content type are used.
    pub fn uses_content_type(&self, content_id: u32) -> bool {
        !self.compat_mode || self.compat_content_types.contains(&content_id)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            name,
            format!("{value} is not a finite positive value"),
        ))
    }
}
