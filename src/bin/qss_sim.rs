//! Thin CLI driver over the `qss_sim` library: loads a run config,
//! drives the simulator to completion, and writes the completion/trace
//! output files the config names. Carries no engineering weight of its
//! own (spec's "command-line entry points" non-goal) — the library is
//! the deliverable, this is the demo harness around it, the same role
//! `pulsar-lang`'s own `main.rs` plays over `rt.rs`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qss_sim::config::RunConfig;
use qss_sim::stats::Stats;
use qss_sim::stream::Stream;

#[derive(Parser, Debug)]
#[command(name = "qss-sim", version, about = "Discrete-event HPC batch-scheduler simulator")]
struct Cli {
    /// Path to a JSON run configuration (simulator + streams).
    #[arg(long)]
    config: PathBuf,
}

fn write_output_file(path: &PathBuf, jobs: &[qss_sim::Job]) -> anyhow::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for job in jobs {
        let mut fields = vec![
            job.arrival_timestamp.to_string(),
            job.submission_timestamp.unwrap_or(0.0).to_string(),
            job.release_timestamp().unwrap_or(0.0).to_string(),
            job.num_nodes.to_string(),
        ];
        if job.label.is_some() {
            fields.push(job.source.clone());
            fields.push(job.label.clone().unwrap());
        } else {
            fields.push(job.source.clone());
        }
        writeln!(w, "{}", fields.join(","))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let contents = std::fs::read_to_string(&cli.config)?;
    let run_config: RunConfig = serde_json::from_str(&contents)?;

    let mut sim = run_config.simulator.build()?;
    let streams: Vec<Box<dyn Stream>> =
        run_config.streams.iter().map(|s| s.build()).collect::<qss_sim::Result<_>>()?;

    sim.run(streams)?;

    let output = sim.output();
    info!(
        jobs_completed = output.len(),
        avg_delay = Stats::avg_delay(output, None),
        avg_queue_length = Stats::avg_queue_length(sim.trace()),
        utilization = Stats::utilization(output, None),
        "run complete"
    );

    if let Some(path) = &run_config.simulator.output_file {
        write_output_file(path, output)?;
    }

    Ok(())
}
