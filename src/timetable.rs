//! Per-node timetable: an ordered, disjoint list of future `[start,
//! end)` busy intervals, with gap enumeration for the backfill planner.

use crate::error::{Result, SimError};

/// Future reservation list for a single node. Invariant: intervals are
/// disjoint and sorted ascending by `start`; adjacent touching
/// intervals are merged on insert.
#[derive(Default, Clone, Debug)]
pub struct Timetable {
    node_id: usize,
    intervals: Vec<(f64, f64)>,
}

impl Timetable {
    pub fn new(node_id: usize) -> Self {
        Self { node_id, intervals: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
    }

    /// Seeds the currently-ongoing busy interval (the tail of a job
    /// already running when the schedule is rebuilt). Called once,
    /// immediately after `reset`, so no prior interval can overlap it.
    pub fn seed_busy(&mut self, start: f64, end: f64) {
        debug_assert!(self.intervals.is_empty(), "seed_busy expects a freshly reset timetable");
        self.intervals.push((start, end));
    }

    /// Inserts `[start, end)`, merging with a neighbor on a touching
    /// boundary. Fails with `OverlapError` if it overlaps an existing
    /// interval.
    pub fn insert(&mut self, start: f64, end: f64) -> Result<()> {
        let pos = self
            .intervals
            .partition_point(|&(s, _)| s < start);

        if let Some(&(ps, pe)) = pos.checked_sub(1).and_then(|i| self.intervals.get(i)) {
            if start < pe {
                return Err(SimError::OverlapError { node_id: self.node_id, start });
            }
            if let Some(&(ns, _)) = self.intervals.get(pos) {
                if end > ns {
                    return Err(SimError::OverlapError { node_id: self.node_id, start });
                }
            }
            if start == pe {
                // Merge into the previous interval.
                let merged_end = end.max(self.intervals[pos - 1].1);
                self.intervals[pos - 1].1 = merged_end;
                self.merge_forward(pos - 1);
                return Ok(());
            }
        } else if let Some(&(ns, _)) = self.intervals.get(pos) {
            if end > ns {
                return Err(SimError::OverlapError { node_id: self.node_id, start });
            }
        }

        self.intervals.insert(pos, (start, end));
        self.merge_forward(pos);
        Ok(())
    }

    /// After growing the interval at `idx`, absorb any immediately
    /// touching interval that now follows it.
    fn merge_forward(&mut self, idx: usize) {
        while idx + 1 < self.intervals.len() && self.intervals[idx].1 == self.intervals[idx + 1].0 {
            let next_end = self.intervals[idx + 1].1;
            self.intervals[idx].1 = next_end;
            self.intervals.remove(idx + 1);
        }
    }

    /// Computes the gaps visible from `now` onward: `(start, Some(end))`
    /// for bounded gaps, `(start, None)` for the final open gap.
    fn gaps(&self, now: f64) -> Vec<(f64, Option<f64>)> {
        let mut gaps = Vec::new();
        let mut cursor = now;
        for &(s, e) in &self.intervals {
            if e <= now {
                continue;
            }
            let s_clamped = s.max(now);
            if s_clamped > cursor {
                gaps.push((cursor, Some(s_clamped)));
            }
            cursor = cursor.max(e);
        }
        gaps.push((cursor, None));
        gaps
    }

    /// Yields `(timestamp, +1/-1)` pairs marking when this node becomes
    /// eligible (and stops being eligible) to start a `wall_time`-long
    /// job. One pass over the gap list — cheap enough at expected sizes
    /// that materializing the `Vec` (rather than a hand-rolled lazy
    /// iterator) is the simpler, equally-correct choice (see
    /// `DESIGN.md`).
    pub fn start_points(&self, wall_time: f64, now: f64) -> Vec<(f64, i8)> {
        let mut events = Vec::new();
        for (g0, g1) in self.gaps(now) {
            match g1 {
                Some(g1) => {
                    if g1 - g0 >= wall_time {
                        events.push((g0, 1));
                        events.push((g1 - wall_time, -1));
                    }
                }
                None => {
                    events.push((g0, 1));
                }
            }
        }
        events
    }

    pub fn node_id(&self) -> usize {
        self.node_id
    }

    pub fn intervals(&self) -> &[(f64, f64)] {
        &self.intervals
    }
}
