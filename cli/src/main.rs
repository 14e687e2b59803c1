//! `refcalc` CLI: run reconstruction scenarios slice by slice and score them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recon_core::{FilterKind, ReconstructionStats, ReferenceCalculatorSettings};
use sim::{AccuracyMetrics, Scenario, ScenarioKind, SliceSession};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "refcalc", about = "Incremental reference trajectory reconstruction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named scenario through the slice session and report accuracy.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Calculator settings (JSON); defaults are used for missing fields
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write a JSON summary to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Process targets on the calling thread only
        #[arg(long)]
        single_threaded: bool,
        /// Disable the backward smoothing pass
        #[arg(long)]
        no_smooth: bool,
        /// Resample the final references at a fixed interval
        #[arg(long)]
        resample: bool,
        /// Filter kind: uniform, accelerated or imm
        #[arg(long)]
        filter: Option<FilterKind>,
    },
    /// Print the default calculator settings as JSON.
    PrintConfig,
}

/// Flag overrides applied on top of the settings file.
struct Overrides {
    single_threaded: bool,
    no_smooth: bool,
    resample: bool,
    filter: Option<FilterKind>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            config,
            output,
            single_threaded,
            no_smooth,
            resample,
            filter,
        } => {
            let overrides = Overrides {
                single_threaded,
                no_smooth,
                resample,
                filter,
            };
            let settings = load_settings(config.as_deref(), &overrides)?;
            run_scenario(scenario, seed, settings, output.as_deref())?;
        }
        Commands::PrintConfig => {
            let json = serde_json::to_string_pretty(&ReferenceCalculatorSettings::default())?;
            println!("{json}");
        }
    }

    Ok(())
}

fn load_settings(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<ReferenceCalculatorSettings> {
    let mut settings = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing settings in {}", path.display()))?
        }
        None => ReferenceCalculatorSettings::default(),
    };

    if overrides.single_threaded {
        settings.multithreading = false;
    }
    if overrides.no_smooth {
        settings.smooth_rts = false;
    }
    if overrides.resample {
        settings.resample_result = true;
    }
    if let Some(kind) = overrides.filter {
        settings.filter_kind = kind;
    }
    Ok(settings)
}

fn run_scenario(
    kind: ScenarioKind,
    seed: u64,
    settings: ReferenceCalculatorSettings,
    output_path: Option<&Path>,
) -> Result<()> {
    let scenario = Scenario::build(kind, seed);
    println!(
        "Running scenario '{}' (seed={}, duration={:.0}s, filter={:?})...",
        scenario.name, seed, scenario.duration, settings.filter_kind
    );

    let start = std::time::Instant::now();
    let mut session = SliceSession::new(&scenario, settings).context("invalid settings")?;
    info!(
        reports = session.log().reports.len(),
        slices = session.num_slices(),
        "scenario simulated"
    );

    let totals = session.run();
    let elapsed = start.elapsed();
    let accuracy = AccuracyMetrics::evaluate(session.published(), session.truth());

    print_totals(&totals);
    println!(
        "Accuracy: {} targets ({} missing), {} refs matched, \
         RMSE pos={:.1} m vel={:.2} m/s, max pos err={:.1} m",
        accuracy.n_targets,
        accuracy.n_missing_targets,
        accuracy.n_matched,
        accuracy.rmse_position(),
        accuracy.rmse_velocity(),
        accuracy.max_pos_err,
    );
    println!("Elapsed: {:.2}s", elapsed.as_secs_f64());

    if let Some(opath) = output_path {
        let json = serde_json::json!({
            "scenario": scenario.name,
            "seed": seed,
            "elapsed_s": elapsed.as_secs_f64(),
            "settings": session.calculator().settings(),
            "stats": totals,
            "accuracy": accuracy,
            "rmse_position": accuracy.rmse_position(),
            "rmse_velocity": accuracy.rmse_velocity(),
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("writing summary to {}", opath.display()))?;
        println!("Summary saved to {}", opath.display());
    }

    Ok(())
}

fn print_totals(totals: &ReconstructionStats) {
    let c = &totals.counts;
    println!(
        "Done: {} slices, {} target runs, {} measurements, {} references",
        totals.num_slices, totals.num_targets, totals.num_measurements, totals.num_references
    );
    println!(
        "Updates: {} total, {} valid, {} skipped, {} failed (numeric {}, bad state {}, other {})",
        c.num_updates,
        c.num_updates_valid,
        c.num_updates_skipped,
        c.num_updates_failed,
        c.num_updates_failed_numeric,
        c.num_updates_failed_badstate,
        c.num_updates_failed_other,
    );
    println!(
        "Reinit after fail: {}, ccoeff corrected: {}, smoothing failed: {}, \
         smooth steps failed: {}, interp steps failed: {}",
        c.num_updates_raf,
        c.num_updates_ccoeff_corr,
        c.num_smoothing_failed,
        c.num_smooth_steps_failed,
        c.num_interp_steps_failed,
    );
}
