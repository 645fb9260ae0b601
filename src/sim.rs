//! Simulator core: the event loop that drives arrivals, completions,
//! and submissions to termination.

use tracing::{debug, info, instrument};

use crate::error::{Result, SimError};
use crate::job::{Job, JobIdGen};
use crate::node::NodeManager;
use crate::queue::{Decision, QueueManager};
use crate::schedule::ScheduleManager;
use crate::stream::Stream;
use crate::trace::{Action, Trace, TraceEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Arrival,
    Completion,
    Stop,
}

/// Owns the clock, node pool, queue, optional backfill planner, trace,
/// and output channel for one run. Single-threaded, cooperative: every
/// public operation completes synchronously and nothing is shared
/// across a thread boundary.
pub struct Simulator {
    node_manager: NodeManager,
    queue: QueueManager,
    schedule: Option<ScheduleManager>,
    job_ids: JobIdGen,
    time_limit: Option<f64>,
    current_time: f64,
    state: RunState,
    stream_fronts: Vec<Option<Job>>,
    output: Vec<Job>,
    trace: Trace,
    replan_needed: bool,
}

impl Simulator {
    pub fn new(num_nodes: usize, queue: QueueManager, use_scheduler: bool, time_limit: Option<f64>) -> Self {
        Self {
            node_manager: NodeManager::new(num_nodes),
            queue,
            schedule: use_scheduler.then(|| ScheduleManager::new(num_nodes)),
            job_ids: JobIdGen::new(),
            time_limit,
            current_time: 0.0,
            state: RunState::Arrival,
            stream_fronts: Vec::new(),
            output: Vec::new(),
            trace: Trace::new(),
            replan_needed: false,
        }
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    pub fn output(&self) -> &[Job] {
        &self.output
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Resets all run state, pulls the first job from each stream, and
    /// drives the event loop to termination.
    #[instrument(skip(self, streams))]
    pub fn run(&mut self, mut streams: Vec<Box<dyn Stream>>) -> Result<()> {
        if streams.is_empty() {
            return Err(SimError::config("streams must not be empty"));
        }

        self.node_manager.reset();
        self.current_time = 0.0;
        self.replan_needed = false;
        self.output.clear();

        let mut fronts = Vec::with_capacity(streams.len());
        for s in streams.iter_mut() {
            let id = self.job_ids.next();
            fronts.push(s.next(id));
        }
        self.stream_fronts = fronts;

        self.choose_next_timestamp();
        loop {
            self.next_action(&mut streams)?;
            if self.state == RunState::Stop {
                break;
            }
            self.choose_next_timestamp();
        }

        info!(jobs_completed = self.output.len(), "simulation finished");
        Ok(())
    }

    fn next_action(&mut self, streams: &mut [Box<dyn Stream>]) -> Result<()> {
        debug!(current_time = self.current_time, state = ?self.state, "advancing");
        match self.state {
            RunState::Arrival => self.do_arrivals(streams)?,
            RunState::Completion => self.do_completions()?,
            RunState::Stop => return Ok(()),
        }
        self.do_submissions()?;
        Ok(())
    }

    fn do_arrivals(&mut self, streams: &mut [Box<dyn Stream>]) -> Result<()> {
        let mut any = false;
        for i in 0..self.stream_fronts.len() {
            while matches!(&self.stream_fronts[i], Some(j) if j.arrival_timestamp == self.current_time) {
                let job = self.stream_fronts[i].take().unwrap();
                any = true;
                self.admit_job(job)?;
                let next_id = self.job_ids.next();
                self.stream_fronts[i] = streams[i].next(next_id);
            }
        }
        if any {
            self.record_trace(Action::Arrival)?;
        }
        Ok(())
    }

    /// Admits `job` into the queue (or its overflow buffer, or drops
    /// it). A job that lands at the queue tail is scheduled right away;
    /// one that jumps ahead of existing queue entries instead flags a
    /// full re-plan for the next submission pass, per the two
    /// re-planning triggers.
    fn admit_job(&mut self, job: Job) -> Result<()> {
        let job_id = job.job_id;
        let len_before = self.queue.length();
        let decision = self.queue.add(job, self.current_time);
        let entered_queue = decision == Decision::Admitted && self.queue.length() > len_before;
        if entered_queue && self.schedule.is_some() {
            let now = self.current_time;
            let is_tail = self.queue.peek_back().map(|j| j.job_id) == Some(job_id);
            if let Some(queued_job) = self.queue.iterate(None).into_iter().find(|j| j.job_id == job_id).cloned() {
                self.schedule.as_mut().expect("planner configured").add(&queued_job, now)?;
            }
            if !is_tail && !self.schedule.as_ref().expect("planner configured").is_backfill_of(job_id, now) {
                self.replan_needed = true;
            }
        }
        Ok(())
    }

    fn do_completions(&mut self) -> Result<()> {
        let done = self.node_manager.stop(self.current_time);
        if done.is_empty() {
            return Ok(());
        }
        let now = self.current_time;
        for job in &done {
            if self.schedule.is_some() {
                if let (Some(release), Some(scheduled_release)) = (job.release_timestamp(), job.scheduled_release_timestamp()) {
                    if release < scheduled_release {
                        self.replan_needed = true;
                    }
                }
            }
            // Frees the source's admission slot and drains at most one
            // buffered job of that source back into the queue.
            self.queue.complete(&job.source, now);
            if let Some(new_job_id) = self.queue.consume_recent_buffer_admission() {
                if let Some(schedule) = self.schedule.as_mut() {
                    if let Some(new_job) = self.queue.iterate(None).into_iter().find(|j| j.job_id == new_job_id).cloned() {
                        schedule.add(&new_job, now)?;
                    }
                }
            }
        }
        self.output.extend(done);
        self.record_trace(Action::Completion)?;
        Ok(())
    }

    fn do_submissions(&mut self) -> Result<()> {
        if self.schedule.is_some() {
            self.do_submissions_planned()
        } else {
            self.do_submissions_unplanned()
        }
    }

    fn do_submissions_unplanned(&mut self) -> Result<()> {
        loop {
            if self.queue.length() == 0 || self.node_manager.num_idle_nodes() == 0 {
                break;
            }
            let ready = self.node_manager.ready(self.queue.peek_front().expect("non-empty queue"));
            if !ready {
                break;
            }
            let job = self.queue.pop_front(self.current_time).expect("non-empty queue");
            self.node_manager.start(job, self.current_time)?;
            self.queue.consume_recent_buffer_admission();
            self.record_trace(Action::Submission)?;
        }
        Ok(())
    }

    fn do_submissions_planned(&mut self) -> Result<()> {
        if self.replan_needed {
            let release_map = self.node_manager.scheduled_release_map();
            let now = self.current_time;
            let queue = &self.queue;
            let schedule = self.schedule.as_mut().expect("planner configured");
            schedule.set_initial_busy(&release_map, now);
            schedule.recreate_from_queue(queue.iterate(None).into_iter(), now)?;
            self.replan_needed = false;
        }

        loop {
            let due = {
                let schedule = self.schedule.as_mut().expect("planner configured");
                schedule.scheduled_due(self.current_time)
            };
            if due.is_empty() {
                break;
            }
            for (job_id, node_ids) in due {
                let Some(job) = self.queue.pull(job_id, self.current_time) else {
                    continue;
                };
                match self.node_manager.assign(job, &node_ids, self.current_time) {
                    Ok(_) => self.record_trace(Action::Submission)?,
                    Err((err, _job)) => return Err(err),
                }
                if let Some(new_job_id) = self.queue.consume_recent_buffer_admission() {
                    let now = self.current_time;
                    if let Some(new_job) = self.queue.iterate(None).into_iter().find(|j| j.job_id == new_job_id).cloned() {
                        self.schedule.as_mut().expect("planner configured").add(&new_job, now)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn record_trace(&mut self, action: Action) -> Result<()> {
        let entry = TraceEntry {
            timestamp: self.current_time,
            queue_length: self.queue.length(),
            jobs_in_service: self.node_manager.num_allocations(),
            action,
            queue_by_source_with_buffer: self.queue.counts_by_source_with_buffer(),
            queue_by_source: self.queue.counts_by_source(),
            service_by_source: self.node_manager.running_counts_by_source(),
        };
        self.trace.record(entry)
    }

    fn choose_next_timestamp(&mut self) {
        let t_a = self
            .stream_fronts
            .iter()
            .filter_map(|f| f.as_ref().map(|j| j.arrival_timestamp))
            .min_by(|a, b| a.partial_cmp(b).expect("arrival timestamps are never NaN"));
        let t_r = self.node_manager.next_release_timestamp();

        self.state = match (t_a, t_r) {
            (None, None) => RunState::Stop,
            (Some(a), None) => {
                self.current_time = a;
                RunState::Arrival
            }
            (Some(a), Some(r)) if r >= a => {
                self.current_time = a;
                RunState::Arrival
            }
            (_, Some(r)) => {
                self.current_time = r;
                RunState::Completion
            }
        };

        if let Some(limit) = self.time_limit {
            if self.current_time > limit {
                self.state = RunState::Stop;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Discipline, JobInit};
    use std::collections::HashMap;

    struct FixedStream {
        jobs: std::vec::IntoIter<(f64, usize, f64, f64, &'static str)>,
    }

    impl FixedStream {
        fn new(jobs: Vec<(f64, usize, f64, f64, &'static str)>) -> Self {
            Self { jobs: jobs.into_iter() }
        }
    }

    impl Stream for FixedStream {
        fn next(&mut self, job_id: crate::job::JobId) -> Option<Job> {
            self.jobs.next().map(|(arrival, nodes, exec, wall, source)| {
                Job::new(job_id, arrival, nodes, exec, Some(wall), source, None)
            })
        }
    }

    fn fifo_queue() -> QueueManager {
        QueueManager::new(Discipline::Fifo, None, HashMap::new(), None, false, JobInit::None)
    }

    #[test]
    fn deterministic_fifo_single_node() {
        let mut sim = Simulator::new(1, fifo_queue(), false, None);
        let stream = FixedStream::new(vec![(0.0, 1, 5.0, 5.0, "A"), (1.0, 1, 2.0, 2.0, "A")]);
        sim.run(vec![Box::new(stream)]).unwrap();

        let output = sim.output();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].submission_timestamp, Some(0.0));
        assert_eq!(output[0].release_timestamp(), Some(5.0));
        assert_eq!(output[1].submission_timestamp, Some(5.0));
        assert_eq!(output[1].release_timestamp(), Some(7.0));

        let avg_delay = crate::stats::Stats::avg_delay(output, None);
        assert_eq!(avg_delay, 5.5);
    }

    #[test]
    fn admission_limit_with_buffer_drains_on_departure() {
        let mut limits = HashMap::new();
        limits.insert("A".to_string(), 1);
        let queue = QueueManager::new(Discipline::Fifo, None, limits, None, true, JobInit::None);
        let mut sim = Simulator::new(1, queue, false, None);
        let stream = FixedStream::new(vec![
            (0.0, 1, 1.0, 1.0, "A"),
            (0.5, 1, 1.0, 1.0, "A"),
            (1.0, 1, 1.0, 1.0, "A"),
        ]);
        sim.run(vec![Box::new(stream)]).unwrap();
        assert_eq!(sim.output().len(), 3);
    }

    #[test]
    fn rejects_empty_stream_list() {
        let mut sim = Simulator::new(1, fifo_queue(), false, None);
        assert!(sim.run(vec![]).is_err());
    }

    #[test]
    fn backfill_fills_gap_before_reservation() {
        let mut sim = Simulator::new(4, fifo_queue(), true, None);
        let stream = FixedStream::new(vec![(0.0, 4, 10.0, 10.0, "A"), (0.0, 2, 3.0, 3.0, "B")]);
        sim.run(vec![Box::new(stream)]).unwrap();
        let output = sim.output();
        let job_b = output.iter().find(|j| j.source == "B").unwrap();
        assert_eq!(job_b.submission_timestamp, Some(10.0));
    }

    #[test]
    fn early_completion_triggers_replan() {
        let mut sim = Simulator::new(2, fifo_queue(), true, None);
        let stream = FixedStream::new(vec![(0.0, 2, 4.0, 10.0, "A"), (0.0, 1, 2.0, 2.0, "B")]);
        sim.run(vec![Box::new(stream)]).unwrap();
        let output = sim.output();
        let job_b = output.iter().find(|j| j.source == "B").unwrap();
        // Job A frees both nodes at t=4 (it completes early relative to
        // its 10s wall time); the re-plan should pull job B in then.
        assert_eq!(job_b.submission_timestamp, Some(4.0));
    }
}
