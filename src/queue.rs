//! Queue manager: FIFO or aged-priority admission ordering, per-source
//! limits, and an overflow buffer.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};

use ordered_float::OrderedFloat;
use priority_queue::PriorityQueue;

use crate::job::{Job, JobId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    Fifo,
    Priority,
}

/// Admission outcome of `QueueManager::add`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected,
}

/// A priority band: jobs whose `num_nodes` falls in `[min, max]` get
/// `group` and a starting `base_priority` on admission.
#[derive(Clone, Debug)]
pub struct PriorityBand {
    pub min: usize,
    pub max: usize,
    pub group: i64,
    pub base_priority: f64,
}

#[derive(Clone, Debug, Default)]
pub enum JobInit {
    #[default]
    None,
    PriorityBands(Vec<PriorityBand>),
}

impl JobInit {
    fn apply(&self, job: &mut Job) {
        if let JobInit::PriorityBands(bands) = self {
            for b in bands {
                if job.num_nodes >= b.min && job.num_nodes <= b.max {
                    job.group = b.group;
                    job.priority = b.base_priority;
                    return;
                }
            }
        }
    }
}

/// `(priority, -insertion_seq)` ordering: a `PriorityQueue::pop()`
/// returns the greatest key, so higher `priority` pops first; on a
/// priority tie, the smaller (earlier) `seq` — wrapped in `Reverse` —
/// compares greater and pops first, giving the stable "ties broken by
/// insertion order" spec requires.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    priority: OrderedFloat<f64>,
    neg_seq: Reverse<u64>,
}

enum Order {
    Fifo(VecDeque<JobId>),
    Priority(PriorityQueue<JobId, PriorityKey>),
}

pub struct QueueManager {
    discipline: Discipline,
    total_limit: Option<usize>,
    per_source_limits: HashMap<String, usize>,
    default_per_source_limit: Option<usize>,
    use_buffer: bool,
    job_init: JobInit,

    jobs: HashMap<JobId, Job>,
    order: Order,
    insertion_seq: HashMap<JobId, u64>,
    next_seq: u64,

    per_source_count: HashMap<String, usize>,
    in_flight_per_source: HashMap<String, usize>,
    buffer: HashMap<String, VecDeque<Job>>,

    last_admit_time: Option<f64>,
    num_dropped: usize,
    num_dropped_per_source: HashMap<String, usize>,
    recent_buffer_admission: Option<JobId>,
}

impl QueueManager {
    pub fn new(
        discipline: Discipline,
        total_limit: Option<usize>,
        per_source_limits: HashMap<String, usize>,
        default_per_source_limit: Option<usize>,
        use_buffer: bool,
        job_init: JobInit,
    ) -> Self {
        let order = match discipline {
            Discipline::Fifo => Order::Fifo(VecDeque::new()),
            Discipline::Priority => Order::Priority(PriorityQueue::new()),
        };
        Self {
            discipline,
            total_limit,
            per_source_limits,
            default_per_source_limit,
            use_buffer,
            job_init,
            jobs: HashMap::new(),
            order,
            insertion_seq: HashMap::new(),
            next_seq: 0,
            per_source_count: HashMap::new(),
            in_flight_per_source: HashMap::new(),
            buffer: HashMap::new(),
            last_admit_time: None,
            num_dropped: 0,
            num_dropped_per_source: HashMap::new(),
            recent_buffer_admission: None,
        }
    }

    pub fn length(&self) -> usize {
        self.jobs.len()
    }

    pub fn length_buffer(&self) -> usize {
        self.buffer.values().map(VecDeque::len).sum()
    }

    pub fn length_total(&self) -> usize {
        self.length() + self.length_buffer()
    }

    /// Jobs of `source` currently sitting in the queue proper (buffered
    /// overflow and already-dispatched jobs are not counted).
    pub fn num_jobs(&self, source: &str) -> usize {
        self.per_source_count.get(source).copied().unwrap_or(0)
    }

    /// Jobs of `source` admitted but not yet completed: this spans the
    /// job's whole time in the queue *and* running on a node, which is
    /// the quantity the per-source limit actually gates — a source
    /// stays capped for as long as its jobs occupy nodes, not merely
    /// while they sit in the queue.
    fn in_flight(&self, source: &str) -> usize {
        self.in_flight_per_source.get(source).copied().unwrap_or(0)
    }

    pub fn num_dropped(&self) -> usize {
        self.num_dropped
    }

    pub fn num_dropped_for(&self, source: &str) -> usize {
        self.num_dropped_per_source.get(source).copied().unwrap_or(0)
    }

    fn limit_for(&self, source: &str) -> Option<usize> {
        self.per_source_limits.get(source).copied().or(self.default_per_source_limit)
    }

    /// Admits, buffers, or drops `job` at time `now`.
    pub fn add(&mut self, job: Job, now: f64) -> Decision {
        let mut free_spot = true;
        if let Some(total) = self.total_limit {
            if self.length() >= total {
                free_spot = false;
            }
        }
        if free_spot {
            if let Some(limit) = self.limit_for(&job.source) {
                if self.in_flight(&job.source) >= limit {
                    free_spot = false;
                }
            }
        }

        if free_spot {
            self.admit(job, now);
            Decision::Admitted
        } else if self.use_buffer {
            self.buffer.entry(job.source.clone()).or_default().push_back(job);
            Decision::Admitted
        } else {
            self.num_dropped += 1;
            *self.num_dropped_per_source.entry(job.source.clone()).or_insert(0) += 1;
            Decision::Rejected
        }
    }

    fn age_all(&mut self, delta: f64) {
        if delta == 0.0 {
            return;
        }
        if let Order::Priority(pq) = &mut self.order {
            let ids: Vec<JobId> = pq.iter().map(|(id, _)| *id).collect();
            for id in ids {
                let job = self.jobs.get_mut(&id).expect("queued job must be tracked");
                job.priority += delta;
                let seq = self.insertion_seq[&id];
                pq.change_priority(&id, PriorityKey { priority: OrderedFloat(job.priority), neg_seq: Reverse(seq) });
            }
        }
    }

    fn admit(&mut self, mut job: Job, now: f64) {
        if self.discipline == Discipline::Priority {
            let last = self.last_admit_time.unwrap_or(now);
            let delta = now - last;
            self.age_all(delta);
            self.last_admit_time = Some(now);
        }
        self.job_init.apply(&mut job);

        let id = job.job_id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insertion_seq.insert(id, seq);

        match &mut self.order {
            Order::Fifo(dq) => dq.push_back(id),
            Order::Priority(pq) => {
                pq.push(id, PriorityKey { priority: OrderedFloat(job.priority), neg_seq: Reverse(seq) });
            }
        }
        *self.per_source_count.entry(job.source.clone()).or_insert(0) += 1;
        *self.in_flight_per_source.entry(job.source.clone()).or_insert(0) += 1;
        self.jobs.insert(id, job);
    }

    fn front_id(&self) -> Option<JobId> {
        match &self.order {
            Order::Fifo(dq) => dq.front().copied(),
            Order::Priority(pq) => pq.peek().map(|(id, _)| *id),
        }
    }

    fn back_id(&self) -> Option<JobId> {
        match &self.order {
            Order::Fifo(dq) => dq.back().copied(),
            Order::Priority(pq) => pq.iter().min_by_key(|(_, p)| **p).map(|(id, _)| *id),
        }
    }

    pub fn peek_front(&self) -> Option<&Job> {
        self.front_id().and_then(|id| self.jobs.get(&id))
    }

    pub fn peek_back(&self) -> Option<&Job> {
        self.back_id().and_then(|id| self.jobs.get(&id))
    }

    fn remove_by_id(&mut self, id: JobId) -> Option<Job> {
        match &mut self.order {
            Order::Fifo(dq) => {
                let pos = dq.iter().position(|&x| x == id)?;
                dq.remove(pos);
            }
            Order::Priority(pq) => {
                pq.remove(&id)?;
            }
        }
        self.insertion_seq.remove(&id);
        let job = self.jobs.remove(&id)?;
        if let Some(c) = self.per_source_count.get_mut(&job.source) {
            *c = c.saturating_sub(1);
        }
        Some(job)
    }

    /// Removes and returns the queue head. The job stays counted
    /// against its source's admission limit until it completes.
    pub fn pop_front(&mut self, now: f64) -> Option<Job> {
        let _ = now;
        let id = self.front_id()?;
        self.remove_by_id(id)
    }

    /// Removes and returns a specific queued job by id.
    pub fn pull(&mut self, id: JobId, now: f64) -> Option<Job> {
        let _ = now;
        self.remove_by_id(id)
    }

    /// Records that a job of `source` has left the system (not merely
    /// the queue), freeing its admission slot; if the source's overflow
    /// buffer is non-empty, drains exactly one buffered job into the
    /// queue by re-entering `add`.
    pub fn complete(&mut self, source: &str, now: f64) {
        if let Some(c) = self.in_flight_per_source.get_mut(source) {
            *c = c.saturating_sub(1);
        }
        let next = match self.buffer.get_mut(source) {
            Some(buf) => buf.pop_front(),
            None => None,
        };
        if let Some(buffered) = next {
            if self.buffer.get(source).is_some_and(VecDeque::is_empty) {
                self.buffer.remove(source);
            }
            let id = buffered.job_id;
            if self.add(buffered, now) == Decision::Admitted {
                self.recent_buffer_admission = Some(id);
            }
        }
    }

    /// Takes the id of the job most recently promoted out of the
    /// overflow buffer by `complete`, if any, clearing it.
    pub fn consume_recent_buffer_admission(&mut self) -> Option<JobId> {
        self.recent_buffer_admission.take()
    }

    /// Ordered, read-only view for planners; does not mutate the queue.
    pub fn iterate(&self, limit: Option<usize>) -> Vec<&Job> {
        let ids: Vec<JobId> = match &self.order {
            Order::Fifo(dq) => dq.iter().copied().collect(),
            Order::Priority(pq) => {
                let mut entries: Vec<(JobId, PriorityKey)> = pq.iter().map(|(id, p)| (*id, *p)).collect();
                entries.sort_by(|a, b| b.1.cmp(&a.1));
                entries.into_iter().map(|(id, _)| id).collect()
            }
        };
        let take = limit.unwrap_or(ids.len());
        ids.into_iter().take(take).filter_map(|id| self.jobs.get(&id)).collect()
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Per-source counts of queued jobs plus their buffered overflow,
    /// for the trace line's first label-count field.
    pub fn counts_by_source_with_buffer(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = self
            .per_source_count
            .iter()
            .filter(|&(_, &n)| n > 0)
            .map(|(k, &v)| (k.clone(), v))
            .collect();
        for (source, buf) in &self.buffer {
            if buf.is_empty() {
                continue;
            }
            *counts.entry(source.clone()).or_insert(0) += buf.len();
        }
        counts
    }

    /// Per-source counts of queued jobs only (buffer excluded), for the
    /// trace line's second label-count field.
    pub fn counts_by_source(&self) -> BTreeMap<String, usize> {
        self.per_source_count.iter().filter(|&(_, &n)| n > 0).map(|(k, &v)| (k.clone(), v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: JobId, source: &str, priority: f64) -> Job {
        let mut j = Job::new(id, 0.0, 1, 1.0, None, source, None);
        j.priority = priority;
        j
    }

    #[test]
    fn fifo_appends_and_pops_in_order() {
        let mut q = QueueManager::new(Discipline::Fifo, None, HashMap::new(), None, false, JobInit::None);
        assert_eq!(q.add(job(0, "A", 0.0), 0.0), Decision::Admitted);
        assert_eq!(q.add(job(1, "A", 0.0), 0.0), Decision::Admitted);
        assert_eq!(q.pop_front(0.0).unwrap().job_id, 0);
        assert_eq!(q.pop_front(0.0).unwrap().job_id, 1);
    }

    #[test]
    fn priority_orders_descending_with_stable_ties() {
        let mut q = QueueManager::new(Discipline::Priority, None, HashMap::new(), None, false, JobInit::None);
        q.add(job(0, "A", 5.0), 0.0);
        q.add(job(1, "A", 10.0), 0.0);
        q.add(job(2, "A", 5.0), 0.0);
        let order: Vec<JobId> = q.iterate(None).into_iter().map(|j| j.job_id).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn aging_bumps_existing_jobs_before_insert() {
        let mut q = QueueManager::new(Discipline::Priority, None, HashMap::new(), None, false, JobInit::None);
        q.add(job(0, "A", 0.0), 0.0);
        q.add(job(1, "A", 0.0), 5.0);
        // job 0 aged by 5 (now - last_admit_time), job 1 inserted at priority 0.
        let order: Vec<(JobId, f64)> = q.iterate(None).into_iter().map(|j| (j.job_id, j.priority)).collect();
        assert_eq!(order, vec![(0, 5.0), (1, 0.0)]);
    }

    #[test]
    fn total_limit_rejects_without_buffer() {
        let mut q = QueueManager::new(Discipline::Fifo, Some(1), HashMap::new(), None, false, JobInit::None);
        assert_eq!(q.add(job(0, "A", 0.0), 0.0), Decision::Admitted);
        assert_eq!(q.add(job(1, "A", 0.0), 0.0), Decision::Rejected);
        assert_eq!(q.num_dropped(), 1);
    }

    #[test]
    fn per_source_limit_buffers_until_the_running_job_completes() {
        let mut limits = HashMap::new();
        limits.insert("A".to_string(), 1);
        let mut q = QueueManager::new(Discipline::Fifo, None, limits, None, true, JobInit::None);
        assert_eq!(q.add(job(0, "A", 0.0), 0.0), Decision::Admitted);
        assert_eq!(q.add(job(1, "A", 0.0), 0.5), Decision::Admitted); // buffered
        assert_eq!(q.length(), 1);
        assert_eq!(q.length_buffer(), 1);

        // Dispatching job 0 onto a node doesn't free its source's slot;
        // job 1 stays buffered for as long as job 0 is in flight.
        let popped = q.pop_front(1.0).unwrap();
        assert_eq!(popped.job_id, 0);
        assert_eq!(q.length(), 0);
        assert_eq!(q.length_buffer(), 1);
        assert_eq!(q.consume_recent_buffer_admission(), None);

        // Only once job 0 completes does job 1 get drained in.
        q.complete("A", 2.0);
        assert_eq!(q.length(), 1);
        assert_eq!(q.length_buffer(), 0);
        assert_eq!(q.consume_recent_buffer_admission(), Some(1));
    }

    #[test]
    fn total_limit_zero_drops_every_arrival() {
        let mut q = QueueManager::new(Discipline::Fifo, Some(0), HashMap::new(), None, false, JobInit::None);
        assert_eq!(q.add(job(0, "A", 0.0), 0.0), Decision::Rejected);
        assert_eq!(q.num_dropped(), 1);
    }

    #[test]
    fn job_init_priority_bands_set_group_and_priority() {
        let bands = JobInit::PriorityBands(vec![PriorityBand { min: 1, max: 2, group: 7, base_priority: 42.0 }]);
        let mut q = QueueManager::new(Discipline::Priority, None, HashMap::new(), None, false, bands);
        q.add(job(0, "A", 0.0), 0.0);
        let j = q.peek_front().unwrap();
        assert_eq!(j.group, 7);
        assert_eq!(j.priority, 42.0);
    }
}
