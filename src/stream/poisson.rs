//! Synthetic exponential-arrival / exponential-service stream, seeded
//! for reproducible runs.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};

use crate::error::{Result, SimError};
use crate::job::{Job, JobId};
use crate::stream::Stream;

/// Poisson-arrival process with exponential service times. Interarrival
/// gaps are drawn from `Exp(arrival_rate)`; execution times from
/// `Exp(service_rate)`. Terminates after `num_jobs` jobs or once the
/// next arrival would exceed `time_limit`, whichever is configured;
/// at least one of the two must be set.
pub struct PoissonStream {
    rng: StdRng,
    arrival_dist: Exp<f64>,
    service_dist: Exp<f64>,
    num_nodes: usize,
    source: String,
    label: Option<String>,
    next_arrival: f64,
    emitted: u64,
    num_jobs: Option<u64>,
    time_limit: Option<f64>,
}

#[allow(clippy::too_many_arguments)]
impl PoissonStream {
    pub fn new(
        seed: u64,
        arrival_rate: f64,
        service_rate: f64,
        num_nodes: usize,
        source: impl Into<String>,
        label: Option<String>,
        first_arrival: Option<f64>,
        num_jobs: Option<u64>,
        time_limit: Option<f64>,
    ) -> Result<Self> {
        if num_jobs.is_none() && time_limit.is_none() {
            return Err(SimError::config("Poisson stream needs num_jobs or time_limit to terminate"));
        }
        let arrival_dist = Exp::new(arrival_rate)
            .map_err(|e| SimError::config(format!("invalid arrival_rate {arrival_rate}: {e}")))?;
        let service_dist = Exp::new(service_rate)
            .map_err(|e| SimError::config(format!("invalid service_rate {service_rate}: {e}")))?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            arrival_dist,
            service_dist,
            num_nodes,
            source: source.into(),
            label,
            next_arrival: first_arrival.unwrap_or(0.0),
            emitted: 0,
            num_jobs,
            time_limit,
        })
    }
}

impl Stream for PoissonStream {
    fn next(&mut self, job_id: JobId) -> Option<Job> {
        if let Some(limit) = self.num_jobs {
            if self.emitted >= limit {
                return None;
            }
        }
        let arrival = self.next_arrival;
        if let Some(tl) = self.time_limit {
            if arrival > tl {
                return None;
            }
        }
        let delta = self.arrival_dist.sample(&mut self.rng);
        self.next_arrival = arrival + delta;
        let exec = self.service_dist.sample(&mut self.rng);
        self.emitted += 1;
        Some(Job::new(job_id, arrival, self.num_nodes, exec, None, self.source.clone(), self.label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_construction_without_a_termination_bound() {
        let result = PoissonStream::new(1, 1.0, 1.0, 1, "A", None, None, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn stops_after_num_jobs() {
        let mut s = PoissonStream::new(1, 1.0, 1.0, 1, "A", None, None, Some(3), None).unwrap();
        let mut count = 0;
        let mut id = 0;
        while let Some(_job) = s.next(id) {
            id += 1;
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn arrivals_are_non_decreasing() {
        let mut s = PoissonStream::new(42, 2.0, 1.0, 1, "A", None, None, Some(20), None).unwrap();
        let mut last = f64::NEG_INFINITY;
        let mut id = 0;
        while let Some(job) = s.next(id) {
            assert!(job.arrival_timestamp >= last);
            last = job.arrival_timestamp;
            id += 1;
        }
    }

    #[test]
    fn honors_first_arrival_override() {
        let mut s = PoissonStream::new(1, 1.0, 1.0, 1, "A", None, Some(100.0), Some(1), None).unwrap();
        let job = s.next(0).unwrap();
        assert_eq!(job.arrival_timestamp, 100.0);
    }

    #[test]
    fn time_limit_ends_the_stream() {
        let mut s = PoissonStream::new(1, 1000.0, 1.0, 1, "A", None, None, None, Some(0.0001)).unwrap();
        let mut count = 0;
        let mut id = 0;
        while let Some(_job) = s.next(id) {
            id += 1;
            count += 1;
            if count > 10_000 {
                break;
            }
        }
        assert!(count < 10_000);
    }
}
