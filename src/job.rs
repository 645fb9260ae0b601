//! Job records: the immutable arrival specification plus the mutable
//! timing fields the simulator assigns on dispatch.

use std::fmt;

/// Monotonically increasing job identifier, generated by the simulator
/// the moment a job is pulled off its stream into the arrival front
/// buffer (see `DESIGN.md`: this happens slightly earlier than
/// admission proper, so that buffered and dropped jobs still have a
/// stable id for counters and traces).
pub type JobId = u64;

#[derive(Default)]
pub struct JobIdGen {
    next: JobId,
}

impl JobIdGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next(&mut self) -> JobId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A job emitted by a stream: arrival time, resource request, and
/// service-time bounds. Immutable once built; the simulator layers
/// mutable fields (`submission_timestamp`, `priority`, `group`) on top
/// once the job is admitted.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub job_id: JobId,
    pub arrival_timestamp: f64,
    pub num_nodes: usize,
    pub execution_time: f64,
    pub wall_time: f64,
    pub source: String,
    pub label: Option<String>,

    pub submission_timestamp: Option<f64>,
    pub priority: f64,
    pub group: i64,
}

impl Job {
    /// Builds a job, defaulting `wall_time` to `execution_time` when
    /// absent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        arrival_timestamp: f64,
        num_nodes: usize,
        execution_time: f64,
        wall_time: Option<f64>,
        source: impl Into<String>,
        label: Option<String>,
    ) -> Self {
        let wall_time = wall_time.unwrap_or(execution_time);
        Self {
            job_id,
            arrival_timestamp,
            num_nodes,
            execution_time,
            wall_time,
            source: source.into(),
            label,
            submission_timestamp: None,
            priority: 0.0,
            group: 0,
        }
    }

    /// Validates the invariants every job must hold:
    /// `execution_time <= wall_time`, positive `num_nodes`/`execution_time`,
    /// non-negative `arrival_timestamp`.
    pub fn validate(&self) -> Result<(), String> {
        if self.arrival_timestamp < 0.0 {
            return Err(format!("job {}: arrival_timestamp must be >= 0", self.job_id));
        }
        if self.num_nodes == 0 {
            return Err(format!("job {}: num_nodes must be > 0", self.job_id));
        }
        if self.execution_time <= 0.0 {
            return Err(format!("job {}: execution_time must be > 0", self.job_id));
        }
        if self.execution_time > self.wall_time {
            return Err(format!(
                "job {}: execution_time ({}) must be <= wall_time ({})",
                self.job_id, self.execution_time, self.wall_time
            ));
        }
        Ok(())
    }

    /// Assigns `submission_timestamp` exactly once; once set it never
    /// changes.
    pub fn submit(&mut self, now: f64) {
        debug_assert!(self.submission_timestamp.is_none(), "submission_timestamp set twice");
        self.submission_timestamp = Some(now);
    }

    pub fn is_submitted(&self) -> bool {
        self.submission_timestamp.is_some()
    }

    /// `release_timestamp = submission_timestamp + execution_time`.
    pub fn release_timestamp(&self) -> Option<f64> {
        self.submission_timestamp.map(|t| t + self.execution_time)
    }

    /// `scheduled_release_timestamp = submission_timestamp + wall_time`.
    pub fn scheduled_release_timestamp(&self) -> Option<f64> {
        self.submission_timestamp.map(|t| t + self.wall_time)
    }

    /// `wait_time = submission_timestamp - arrival_timestamp`.
    pub fn wait_time(&self) -> Option<f64> {
        self.submission_timestamp.map(|t| t - self.arrival_timestamp)
    }

    /// `delay = wait_time + execution_time`.
    pub fn delay(&self) -> Option<f64> {
        self.wait_time().map(|w| w + self.execution_time)
    }

    /// `slowdown = delay / execution_time`: how much worse the job's
    /// total time-in-system was versus running alone, uncontended. 0.0
    /// on the unreachable `execution_time == 0` edge (the invariant
    /// above rules it out at construction time, this guards
    /// defensively regardless).
    pub fn slowdown(&self) -> f64 {
        match self.delay() {
            Some(d) if self.execution_time > 0.0 => d / self.execution_time,
            _ => 0.0,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job#{} source={} arrival={} nodes={} exec={} wall={}",
            self.job_id, self.source, self.arrival_timestamp, self.num_nodes, self.execution_time, self.wall_time
        )
    }
}
