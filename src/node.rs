//! Node manager: owns the pool of N identical node slots, grants and
//! revokes allocations, and reports the earliest upcoming release.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use ordered_float::OrderedFloat;

use crate::error::{Result, SimError};
use crate::job::{Job, JobId};

/// One granted allocation: a job together with the node ids it holds.
/// Kept inside a min-heap ordered by `release_timestamp`, ties broken
/// by insertion order — a `Reverse`-wrapped custom-`Ord` key turns
/// `BinaryHeap`'s max-heap into a min-heap.
struct AllocEntry {
    release_key: OrderedFloat<f64>,
    seq: u64,
    node_ids: Vec<usize>,
    job: Job,
}

impl PartialEq for AllocEntry {
    fn eq(&self, other: &Self) -> bool {
        self.release_key == other.release_key && self.seq == other.seq
    }
}
impl Eq for AllocEntry {}

impl PartialOrd for AllocEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AllocEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release_key
            .cmp(&other.release_key)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Owns N node slots, the allocation list, and per-source running
/// counts. The sole owner of contended node capacity.
pub struct NodeManager {
    num_nodes: usize,
    owner: Vec<Option<JobId>>,
    allocations: BinaryHeap<Reverse<AllocEntry>>,
    next_seq: u64,
    running_per_source: HashMap<String, usize>,
}

impl NodeManager {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            owner: vec![None; num_nodes],
            allocations: BinaryHeap::new(),
            next_seq: 0,
            running_per_source: HashMap::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_idle_nodes(&self) -> usize {
        self.owner.iter().filter(|o| o.is_none()).count()
    }

    pub fn num_busy_nodes(&self) -> usize {
        self.num_nodes - self.num_idle_nodes()
    }

    pub fn num_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn next_release_timestamp(&self) -> Option<f64> {
        self.allocations.peek().map(|Reverse(e)| e.release_key.into_inner())
    }

    pub fn num_running(&self, source: &str) -> usize {
        self.running_per_source.get(source).copied().unwrap_or(0)
    }

    /// True iff `job.num_nodes` idle slots exist.
    pub fn ready(&self, job: &Job) -> bool {
        self.num_idle_nodes() >= job.num_nodes
    }

    fn idle_ids(&self) -> Vec<usize> {
        self.owner
            .iter()
            .enumerate()
            .filter_map(|(i, o)| if o.is_none() { Some(i) } else { None })
            .collect()
    }

    fn insert_allocation(&mut self, job: Job, node_ids: Vec<usize>) {
        for &id in &node_ids {
            self.owner[id] = Some(job.job_id);
        }
        *self.running_per_source.entry(job.source.clone()).or_insert(0) += 1;
        let release_key = OrderedFloat(job.release_timestamp().expect("job must be submitted"));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.allocations.push(Reverse(AllocEntry { release_key, seq, node_ids, job }));
    }

    /// Picks the first `job.num_nodes` idle slots in ascending order,
    /// submits the job at `now`, and records the allocation.
    pub fn start(&mut self, mut job: Job, now: f64) -> Result<JobId> {
        if !self.ready(&job) {
            return Err(SimError::capacity(format!(
                "node {} requested, only {} idle",
                job.num_nodes,
                self.num_idle_nodes()
            )));
        }
        let ids: Vec<usize> = self.idle_ids().into_iter().take(job.num_nodes).collect();
        let job_id = job.job_id;
        job.submit(now);
        self.insert_allocation(job, ids);
        Ok(job_id)
    }

    /// Assigns a specific node-id set. On any violation, no mutation is
    /// visible and the job is handed back to the caller.
    pub fn assign(&mut self, mut job: Job, node_ids: &[usize], now: f64) -> std::result::Result<JobId, (SimError, Job)> {
        if node_ids.len() != job.num_nodes {
            return Err((
                SimError::capacity(format!(
                    "assign requested {} ids but job needs {}",
                    node_ids.len(),
                    job.num_nodes
                )),
                job,
            ));
        }
        for &id in node_ids {
            if id >= self.num_nodes {
                return Err((SimError::capacity(format!("node id {id} out of range")), job));
            }
            if self.owner[id].is_some() {
                return Err((SimError::capacity(format!("node {id} is already busy")), job));
            }
        }
        let job_id = job.job_id;
        job.submit(now);
        self.insert_allocation(job, node_ids.to_vec());
        Ok(job_id)
    }

    /// Pops every allocation releasing exactly at `now`, frees their
    /// node ids, and returns the completed jobs.
    pub fn stop(&mut self, now: f64) -> Vec<Job> {
        let mut done = Vec::new();
        while let Some(Reverse(entry)) = self.allocations.peek() {
            if entry.release_key.into_inner() != now {
                break;
            }
            let Reverse(entry) = self.allocations.pop().unwrap();
            for &id in &entry.node_ids {
                self.owner[id] = None;
            }
            if let Some(c) = self.running_per_source.get_mut(&entry.job.source) {
                *c = c.saturating_sub(1);
            }
            done.push(entry.job);
        }
        done
    }

    /// Snapshot of `node_id -> scheduled_release_timestamp` for every
    /// currently busy node; seeds the planner's per-node timetables
    /// with the tail of jobs already running.
    pub fn scheduled_release_map(&self) -> HashMap<usize, f64> {
        let mut map = HashMap::new();
        for Reverse(entry) in self.allocations.iter() {
            let end = entry
                .job
                .scheduled_release_timestamp()
                .expect("running job must be submitted");
            for &id in &entry.node_ids {
                map.insert(id, end);
            }
        }
        map
    }

    pub fn reset(&mut self) {
        self.owner.iter_mut().for_each(|o| *o = None);
        self.allocations.clear();
        self.running_per_source.clear();
        self.next_seq = 0;
    }

    /// Per-source counts of jobs currently in service, for the trace
    /// line's third label-count field.
    pub fn running_counts_by_source(&self) -> BTreeMap<String, usize> {
        self.running_per_source.iter().filter(|&(_, &n)| n > 0).map(|(k, &v)| (k.clone(), v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: JobId, nodes: usize, exec: f64, wall: f64) -> Job {
        Job::new(id, 0.0, nodes, exec, Some(wall), "A", None)
    }

    #[test]
    fn start_picks_lowest_ids_ascending() {
        let mut nm = NodeManager::new(4);
        let j = job(0, 2, 5.0, 5.0);
        nm.start(j, 0.0).unwrap();
        assert_eq!(nm.num_idle_nodes(), 2);
        assert_eq!(nm.num_busy_nodes(), 2);
    }

    #[test]
    fn start_fails_without_capacity() {
        let mut nm = NodeManager::new(1);
        let j = job(0, 2, 5.0, 5.0);
        assert!(nm.start(j, 0.0).is_err());
    }

    #[test]
    fn assign_rejects_busy_node_and_leaves_no_partial_state() {
        let mut nm = NodeManager::new(2);
        nm.start(job(0, 1, 5.0, 5.0), 0.0).unwrap();
        let before_idle = nm.num_idle_nodes();
        let res = nm.assign(job(1, 1, 1.0, 1.0), &[0], 0.0);
        assert!(res.is_err());
        assert_eq!(nm.num_idle_nodes(), before_idle);
    }

    #[test]
    fn stop_releases_nodes_at_exact_time() {
        let mut nm = NodeManager::new(1);
        nm.start(job(0, 1, 5.0, 5.0), 0.0).unwrap();
        assert!(nm.stop(4.0).is_empty());
        let done = nm.stop(5.0);
        assert_eq!(done.len(), 1);
        assert_eq!(nm.num_idle_nodes(), 1);
    }

    #[test]
    fn allocation_list_sorted_by_release_with_stable_ties() {
        let mut nm = NodeManager::new(4);
        nm.start(job(0, 1, 10.0, 10.0), 0.0).unwrap();
        nm.start(job(1, 1, 5.0, 5.0), 0.0).unwrap();
        assert_eq!(nm.next_release_timestamp(), Some(5.0));
        let first = nm.stop(5.0);
        assert_eq!(first[0].job_id, 1);
    }

    #[test]
    fn scheduled_release_map_reflects_wall_time_not_execution_time() {
        let mut nm = NodeManager::new(1);
        nm.start(job(0, 1, 3.0, 10.0), 0.0).unwrap();
        let map = nm.scheduled_release_map();
        assert_eq!(map.get(&0), Some(&10.0));
    }

    #[test]
    fn reset_clears_all_state() {
        let mut nm = NodeManager::new(2);
        nm.start(job(0, 2, 5.0, 5.0), 0.0).unwrap();
        nm.reset();
        assert_eq!(nm.num_idle_nodes(), 2);
        assert_eq!(nm.num_allocations(), 0);
    }
}
