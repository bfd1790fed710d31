//! `trackrefine` CLI: scenario runs, event-log export and offline refinement.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use refine_core::{
    EndpointPolicy, EndpointPolicyConfig, RefinementConfig, RefinementMetrics, RefinementReport,
    TrackRefinement,
};
use serde::Serialize;
use sim::replay::{load_events, save_events, EventLog};
use sim::scenarios::{Event, Scenario, ScenarioKind};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "trackrefine", about = "Track-fragment refinement batch runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a named scenario, refine every event and report metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of events to simulate
        #[arg(long, default_value_t = 1)]
        events: u64,
        /// Refinement thresholds (JSON, PascalCase keys)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Endpoint policy thresholds (JSON, PascalCase keys)
        #[arg(long)]
        policy_config: Option<PathBuf>,
        /// Output per-event reports and metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the simulated events
        #[arg(long)]
        save_events: Option<PathBuf>,
    },
    /// Refine the events of a previously saved event log.
    Replay {
        /// Path to event log JSON file
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        policy_config: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Per-event line of the JSON output.
#[derive(Serialize)]
struct EventSummary {
    index: u64,
    seed: u64,
    n_hits: usize,
    report: RefinementReport,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    scenario: &'a str,
    seed: u64,
    elapsed_s: f64,
    metrics: RefinementMetrics,
    events: Vec<EventSummary>,
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
            events,
            config,
            policy_config,
            output,
            save_events: save_path,
        } => {
            let refinement = load_refinement(config.as_deref(), policy_config.as_deref())?;
            run_scenario(
                &refinement,
                scenario,
                seed,
                events,
                output.as_deref(),
                save_path.as_deref(),
            )?;
        }
        Commands::Replay {
            input,
            config,
            policy_config,
            output,
        } => {
            let refinement = load_refinement(config.as_deref(), policy_config.as_deref())?;
            run_replay(&refinement, &input, output.as_deref())?;
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))
        }
        None => Ok(T::default()),
    }
}

fn load_refinement(
    config: Option<&Path>,
    policy_config: Option<&Path>,
) -> Result<TrackRefinement<EndpointPolicy>> {
    let config: RefinementConfig = read_json(config)?;
    let policy_config: EndpointPolicyConfig = read_json(policy_config)?;
    Ok(TrackRefinement::new(config, EndpointPolicy::new(policy_config))?)
}

/// Refine events in parallel; failed events are logged and left out.
fn refine_all(refinement: &TrackRefinement<EndpointPolicy>, events: &[Event]) -> Vec<EventSummary> {
    events
        .par_iter()
        .filter_map(|event| {
            let result = event
                .to_store()
                .and_then(|mut store| refinement.run(&mut store));
            match result {
                Ok(report) => Some(EventSummary {
                    index: event.index,
                    seed: event.seed,
                    n_hits: event.n_hits(),
                    report,
                }),
                Err(e) => {
                    warn!(event = event.index, error = %e, "refinement failed");
                    None
                }
            }
        })
        .collect()
}

fn print_metrics(metrics: &RefinementMetrics, elapsed_s: f64) {
    println!(
        "Done: {} events, {} tracks built, {} hits reassigned, elapsed={:.2}s",
        metrics.n_events, metrics.tracks_built, metrics.hits_reassigned, elapsed_s,
    );
    println!(
        "Associations: {} considered, {} near-boundary rejects, {} continuity rejects ({:.1}% accepted)",
        metrics.associations_considered,
        metrics.rejected_near_boundary,
        metrics.rejected_continuity,
        100.0 * metrics.acceptance_rate(),
    );
    println!(
        "Clusters: {} -> {} ({:.1}% fewer), mean iterations {:.2}, {} runs hit the iteration limit",
        metrics.clusters_before,
        metrics.clusters_after,
        100.0 * metrics.cluster_reduction(),
        metrics.mean_iterations(),
        metrics.hit_iteration_limit,
    );
}

fn write_summary(summary: &RunSummary<'_>, path: &Path) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    println!("Reports saved to {}", path.display());
    Ok(())
}

fn run_scenario(
    refinement: &TrackRefinement<EndpointPolicy>,
    kind: ScenarioKind,
    seed: u64,
    n_events: u64,
    output_path: Option<&Path>,
    events_path: Option<&Path>,
) -> Result<()> {
    let scenario = Scenario::build(kind, seed);
    println!(
        "Running scenario '{}' (seed={}, events={})...",
        scenario.name, seed, n_events
    );

    let events = scenario.events(n_events);
    let start = std::time::Instant::now();
    let summaries = refine_all(refinement, &events);
    let elapsed = start.elapsed().as_secs_f64();

    let metrics = RefinementMetrics::from_reports(summaries.iter().map(|s| &s.report));
    info!(scenario = %scenario.name, events = metrics.n_events, "scenario refined");
    print_metrics(&metrics, elapsed);

    if let Some(epath) = events_path {
        let log = EventLog {
            scenario_name: scenario.name.clone(),
            seed,
            ground_truth: scenario.tracks.clone(),
            events,
        };
        save_events(&log, epath)?;
        println!("Events saved to {}", epath.display());
    }

    if let Some(opath) = output_path {
        write_summary(
            &RunSummary {
                scenario: &scenario.name,
                seed,
                elapsed_s: elapsed,
                metrics,
                events: summaries,
            },
            opath,
        )?;
    }

    Ok(())
}

fn run_replay(
    refinement: &TrackRefinement<EndpointPolicy>,
    input: &Path,
    output_path: Option<&Path>,
) -> Result<()> {
    let log = load_events(input)?;
    println!(
        "Replaying '{}' ({} events)...",
        log.scenario_name,
        log.events.len()
    );

    let start = std::time::Instant::now();
    let summaries = refine_all(refinement, &log.events);
    let elapsed = start.elapsed().as_secs_f64();

    let metrics = RefinementMetrics::from_reports(summaries.iter().map(|s| &s.report));
    print_metrics(&metrics, elapsed);

    if let Some(opath) = output_path {
        write_summary(
            &RunSummary {
                scenario: &log.scenario_name,
                seed: log.seed,
                elapsed_s: elapsed,
                metrics,
                events: summaries,
            },
            opath,
        )?;
    }

    Ok(())
}
