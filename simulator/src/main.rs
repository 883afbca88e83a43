use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::{RunStats, Runner};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Offline driver for the moments-compute engine")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]
    beams: usize,
    #[arg(long, default_value_t = 128)]
    gates: usize,
    #[arg(long, default_value_t = 64)]
    samples: usize,
    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report<'a> {
    stats: &'a RunStats,
    mean_dbz: f64,
    mean_vel: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.beams, args.gates, args.samples)
    };

    let stats = Runner::new(config).execute()?;
    println!(
        "run -> beams {}, events {}, flagged gates {}, censored gates {}, mean dbz {:.1}, mean vel {:.1}",
        stats.beams,
        stats.events,
        stats.flagged_gates,
        stats.censored_gates,
        stats.mean_dbz(),
        stats.mean_vel()
    );

    if let Some(path) = args.report {
        let report = Report {
            stats: &stats,
            mean_dbz: stats.mean_dbz(),
            mean_vel: stats.mean_vel(),
        };
        let text = serde_json::to_string_pretty(&report).context("serializing run report")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        fs::write(&path, text).with_context(|| format!("writing report {}", path.display()))?;
    }

    Ok(())
}
