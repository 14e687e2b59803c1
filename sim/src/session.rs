//! Slice session: replays a simulated scenario through the calculator in
//! overlapping time slices.
//!
//! Every slice gets a fresh target registry built from the reports inside
//! `[remove_before, next_slice_begin)`. References published by earlier
//! slices are carried into the registry so the calculator can replace
//! them from the join threshold on.

use crate::{
    report_sim::{ReportSimulator, SimReport},
    scenarios::Scenario,
    target::TruthSample,
};
use recon_core::{
    types::TimeKey, ConfigError, ReconTarget, ReconstructionStats, Reference,
    ReferenceCalculator, ReferenceCalculatorSettings, SliceWindow, TargetId,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Everything the simulator produced for one scenario run.
#[derive(Clone, Debug, Default)]
pub struct SimulationLog {
    /// Reports sorted by time
    pub reports: Vec<SimReport>,
    /// Truth per target, sampled every `sim_dt` while active
    pub truth: BTreeMap<TargetId, Vec<TruthSample>>,
}

/// Propagate the scenario's targets and collect their reports and truth.
pub fn simulate(scenario: &Scenario) -> SimulationLog {
    let mut targets = scenario.targets.clone();
    let mut simulator = ReportSimulator::new(scenario.sensors.clone(), scenario.seed);
    let mut log = SimulationLog::default();

    let dt = scenario.sim_dt;
    let n_steps = (scenario.duration / dt).round() as usize;

    for k in 0..=n_steps {
        let t = k as f64 * dt;
        if k > 0 {
            for target in &mut targets {
                target.step(t - dt, dt);
            }
        }
        for target in targets.iter().filter(|tgt| tgt.is_active(t)) {
            log.truth.entry(target.id).or_default().push(target.sample(t));
        }
        log.reports.extend(simulator.generate_reports(&targets, t));
    }

    log.reports
        .sort_by(|a, b| a.measurement.cmp_time_source(&b.measurement));
    debug!(
        scenario = %scenario.name,
        reports = log.reports.len(),
        targets = log.truth.len(),
        "simulated scenario"
    );
    log
}

/// Drives a [`ReferenceCalculator`] over the slices of one scenario.
pub struct SliceSession {
    name: String,
    duration: f64,
    slice_len: f64,
    slice_overlap: f64,
    log: SimulationLog,
    calculator: ReferenceCalculator,
    /// Latest published trajectory per target
    published: BTreeMap<TargetId, BTreeMap<TimeKey, Reference>>,
    next_slice: usize,
    totals: ReconstructionStats,
}

impl SliceSession {
    /// Simulate `scenario` and set up a calculator with `settings`.
    pub fn new(
        scenario: &Scenario,
        settings: ReferenceCalculatorSettings,
    ) -> Result<Self, ConfigError> {
        let calculator = ReferenceCalculator::new(settings)?;
        Ok(Self::with_calculator(scenario, calculator))
    }

    pub fn with_calculator(scenario: &Scenario, calculator: ReferenceCalculator) -> Self {
        Self {
            name: scenario.name.clone(),
            duration: scenario.duration,
            slice_len: scenario.slice_len,
            slice_overlap: scenario.slice_overlap,
            log: simulate(scenario),
            calculator,
            published: BTreeMap::new(),
            next_slice: 0,
            totals: ReconstructionStats::default(),
        }
    }

    pub fn num_slices(&self) -> usize {
        ((self.duration / self.slice_len).ceil() as usize).max(1)
    }

    /// Window of slice `index`.
    pub fn window(&self, index: usize) -> SliceWindow {
        let begin = index as f64 * self.slice_len;
        let next = begin + self.slice_len;
        let window = if index == 0 {
            SliceWindow::first(begin, next)
        } else {
            SliceWindow::next((begin - self.slice_overlap).max(0.0), begin, next)
        };
        window.with_last(index + 1 == self.num_slices())
    }

    /// Registry of the targets reported inside `window`'s data range.
    fn build_registry(&self, window: &SliceWindow) -> BTreeMap<TargetId, ReconTarget> {
        let reports = &self.log.reports;
        let lo = reports.partition_point(|r| r.measurement.t < window.remove_before);
        let hi = reports.partition_point(|r| r.measurement.t < window.next_slice_begin);

        let mut registry: BTreeMap<TargetId, ReconTarget> = BTreeMap::new();
        for report in &reports[lo..hi] {
            registry
                .entry(report.target)
                .or_insert_with(|| ReconTarget::new(report.target))
                .add_measurement(report.stream, report.measurement.clone());
        }
        for (id, target) in registry.iter_mut() {
            if let Some(previous) = self.published.get(id) {
                target.references = previous.clone();
            }
        }
        registry
    }

    /// Process the next slice. `None` once the session is finished.
    pub fn step_slice(&mut self) -> Option<ReconstructionStats> {
        if self.next_slice >= self.num_slices() {
            return None;
        }
        let window = self.window(self.next_slice);
        let mut registry = self.build_registry(&window);

        self.calculator.prepare_for_next_slice(window, &registry);
        let stats = self.calculator.compute_references(&mut registry);

        for (id, target) in registry {
            self.published.insert(id, target.references);
        }
        self.totals += stats;
        self.next_slice += 1;

        info!(
            session = %self.name,
            slice = self.next_slice - 1,
            slice_begin = window.slice_begin,
            targets = stats.num_targets,
            references = stats.num_references,
            "slice done"
        );
        Some(stats)
    }

    /// Process all remaining slices and return the totals.
    pub fn run(&mut self) -> ReconstructionStats {
        while self.step_slice().is_some() {}
        self.totals
    }

    pub fn totals(&self) -> ReconstructionStats {
        self.totals
    }

    pub fn published(&self) -> &BTreeMap<TargetId, BTreeMap<TimeKey, Reference>> {
        &self.published
    }

    pub fn truth(&self) -> &BTreeMap<TargetId, Vec<TruthSample>> {
        &self.log.truth
    }

    pub fn log(&self) -> &SimulationLog {
        &self.log
    }

    pub fn calculator(&self) -> &ReferenceCalculator {
        &self.calculator
    }
}
