//! qss-sim: a discrete-event simulator of a multi-node HPC-like batch
//! scheduler — arrival streams, an admission queue, a node pool, and an
//! optional backfill planner, observed through a trace/metrics layer.
//!
//! The event loop (`sim::Simulator`) is the entry point: it owns the
//! clock and coordinates the queue, node, and schedule managers exactly
//! as described in `DESIGN.md`.

pub mod config;
pub mod error;
pub mod job;
pub mod node;
pub mod queue;
pub mod schedule;
pub mod sim;
pub mod stats;
pub mod stream;
pub mod timetable;
pub mod trace;

pub use error::{Result, SimError};
pub use job::{Job, JobId};
pub use sim::Simulator;
