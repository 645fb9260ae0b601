//! Typed, `serde`-deserializable configuration records replacing a
//! dynamic policy mapping with enumerated fields.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::queue::{Discipline, JobInit, PriorityBand, QueueManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisciplineConfig {
    Fifo,
    Priority,
}

impl From<DisciplineConfig> for Discipline {
    fn from(d: DisciplineConfig) -> Self {
        match d {
            DisciplineConfig::Fifo => Discipline::Fifo,
            DisciplineConfig::Priority => Discipline::Priority,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PriorityBandConfig {
    pub min: usize,
    pub max: usize,
    pub group: i64,
    pub base_priority: f64,
}

impl From<PriorityBandConfig> for PriorityBand {
    fn from(b: PriorityBandConfig) -> Self {
        PriorityBand { min: b.min, max: b.max, group: b.group, base_priority: b.base_priority }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum JobInitConfig {
    #[default]
    None,
    PriorityBands {
        bands: Vec<PriorityBandConfig>,
    },
}

impl From<JobInitConfig> for JobInit {
    fn from(c: JobInitConfig) -> Self {
        match c {
            JobInitConfig::None => JobInit::None,
            JobInitConfig::PriorityBands { bands } => {
                JobInit::PriorityBands(bands.into_iter().map(PriorityBand::from).collect())
            }
        }
    }
}

/// Queue policy: discipline, admission limits, overflow buffer, and the
/// optional `job_init` strategy.
#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    pub discipline: DisciplineConfig,
    #[serde(default)]
    pub total_limit: Option<usize>,
    #[serde(default)]
    pub per_source_limits: HashMap<String, usize>,
    #[serde(default)]
    pub default_per_source_limit: Option<usize>,
    #[serde(default)]
    pub use_buffer: bool,
    #[serde(default)]
    pub job_init: JobInitConfig,
}

impl QueueConfig {
    pub fn build(&self) -> QueueManager {
        QueueManager::new(
            self.discipline.into(),
            self.total_limit,
            self.per_source_limits.clone(),
            self.default_per_source_limit,
            self.use_buffer,
            self.job_init.clone().into(),
        )
    }
}

/// Simulator-level configuration: node pool size, whether the backfill
/// planner is enabled, the queue policy, and optional output sinks.
#[derive(Clone, Debug, Deserialize)]
pub struct SimulatorConfig {
    pub num_nodes: usize,
    pub queue: QueueConfig,
    #[serde(default)]
    pub use_scheduler: bool,
    #[serde(default)]
    pub time_limit: Option<f64>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub trace_file: Option<PathBuf>,
}

impl SimulatorConfig {
    /// Builds the simulator, wiring the trace file (if any) through
    /// `Simulator::with_trace`. `output_file` is the CLI's concern, not
    /// the simulator's: it is written from `Simulator::output()` after
    /// `run` returns.
    pub fn build(&self) -> crate::error::Result<crate::sim::Simulator> {
        let sim = crate::sim::Simulator::new(self.num_nodes, self.queue.build(), self.use_scheduler, self.time_limit);
        Ok(match &self.trace_file {
            Some(path) => sim.with_trace(crate::trace::Trace::with_file(path)?),
            None => sim,
        })
    }
}

/// One configured input stream.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamConfig {
    Poisson {
        seed: u64,
        arrival_rate: f64,
        service_rate: f64,
        #[serde(default = "default_num_nodes")]
        num_nodes: usize,
        #[serde(default = "default_source")]
        source: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        first_arrival: Option<f64>,
        #[serde(default)]
        num_jobs: Option<u64>,
        #[serde(default)]
        time_limit: Option<f64>,
    },
    Replay {
        path: PathBuf,
        #[serde(default)]
        time_limit: Option<f64>,
    },
}

fn default_num_nodes() -> usize {
    1
}

fn default_source() -> String {
    "synthetic".to_string()
}

impl StreamConfig {
    /// Builds the configured stream. Boxed behind the shared `Stream`
    /// trait object so the CLI can assemble a `Vec<Box<dyn Stream>>`
    /// from a mix of stream kinds.
    pub fn build(&self) -> crate::error::Result<Box<dyn crate::stream::Stream>> {
        match self {
            StreamConfig::Poisson {
                seed,
                arrival_rate,
                service_rate,
                num_nodes,
                source,
                label,
                first_arrival,
                num_jobs,
                time_limit,
            } => {
                let stream = crate::stream::PoissonStream::new(
                    *seed,
                    *arrival_rate,
                    *service_rate,
                    *num_nodes,
                    source.clone(),
                    label.clone(),
                    *first_arrival,
                    *num_jobs,
                    *time_limit,
                )?;
                Ok(Box::new(stream))
            }
            StreamConfig::Replay { path, time_limit } => {
                Ok(Box::new(crate::stream::ReplayStream::new(path, *time_limit)?))
            }
        }
    }
}

/// Top-level deserialized form of a run: the simulator's configuration
/// plus the list of input streams that feed it.
#[derive(Clone, Debug, Deserialize)]
pub struct RunConfig {
    pub simulator: SimulatorConfig,
    pub streams: Vec<StreamConfig>,
}

#[cfg(test)]
mod run_config_tests {
    use super::*;

    #[test]
    fn deserializes_a_full_run() {
        let json = r#"{
            "simulator": {"num_nodes": 2, "queue": {"discipline": "fifo"}},
            "streams": [{"kind": "replay", "path": "jobs.csv"}]
        }"#;
        let cfg: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.simulator.num_nodes, 2);
        assert_eq!(cfg.streams.len(), 1);
    }
}
