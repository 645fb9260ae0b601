//! Time-weighted and per-job aggregates computed from a finished run's
//! trace and output channel.

use std::collections::BTreeMap;

use crate::job::Job;
use crate::trace::Trace;

fn avg_weighted_by_time<F: Fn(&crate::trace::TraceEntry) -> f64>(trace: &Trace, f: F) -> f64 {
    let entries = trace.entries();
    if entries.len() < 2 {
        return 0.0;
    }
    let span = entries.last().unwrap().timestamp - entries.first().unwrap().timestamp;
    if span <= 0.0 {
        return 0.0;
    }
    let mut acc = 0.0;
    for w in entries.windows(2) {
        let dt = w[1].timestamp - w[0].timestamp;
        acc += f(&w[0]) * dt;
    }
    acc / span
}

fn filtered<'a>(output: &'a [Job], source: Option<&str>) -> impl Iterator<Item = &'a Job> {
    output.iter().filter(move |j| source.map_or(true, |s| j.source == s))
}

pub struct Stats;

impl Stats {
    /// `Σ (queue_len + in_service) · Δt / total_span`.
    pub fn avg_num_jobs(trace: &Trace) -> f64 {
        avg_weighted_by_time(trace, |e| (e.queue_length + e.jobs_in_service) as f64)
    }

    /// `Σ queue_len · Δt / total_span`.
    pub fn avg_queue_length(trace: &Trace) -> f64 {
        avg_weighted_by_time(trace, |e| e.queue_length as f64)
    }

    /// Mean `delay` over the output-channel slice matching `source`
    /// (all jobs when `None`). Zero on an empty slice.
    pub fn avg_delay(output: &[Job], source: Option<&str>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for job in filtered(output, source) {
            sum += job.delay().unwrap_or(0.0);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// `Σ job.num_nodes · job.execution_time` over the matching slice.
    pub fn utilization(output: &[Job], source: Option<&str>) -> f64 {
        filtered(output, source).map(|j| j.num_nodes as f64 * j.execution_time).sum()
    }

    /// Mean `wait_time` over the matching slice. Not named by the base
    /// aggregate set but recovered alongside `avg_delay`'s shape.
    pub fn avg_wait_time(output: &[Job], source: Option<&str>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for job in filtered(output, source) {
            sum += job.wait_time().unwrap_or(0.0);
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Per-source breakdown of delay, wait time, utilization, and
    /// completed-job count.
    pub fn by_source(output: &[Job]) -> BTreeMap<String, SourceStats> {
        let mut sources: BTreeMap<String, Vec<&Job>> = BTreeMap::new();
        for job in output {
            sources.entry(job.source.clone()).or_default().push(job);
        }
        sources
            .into_iter()
            .map(|(source, jobs)| {
                let count = jobs.len();
                let avg_delay = if count == 0 {
                    0.0
                } else {
                    jobs.iter().map(|j| j.delay().unwrap_or(0.0)).sum::<f64>() / count as f64
                };
                let avg_wait_time = if count == 0 {
                    0.0
                } else {
                    jobs.iter().map(|j| j.wait_time().unwrap_or(0.0)).sum::<f64>() / count as f64
                };
                let utilization = jobs.iter().map(|j| j.num_nodes as f64 * j.execution_time).sum();
                (source, SourceStats { count, avg_delay, avg_wait_time, utilization })
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceStats {
    pub count: usize,
    pub avg_delay: f64,
    pub avg_wait_time: f64,
    pub utilization: f64,
}
