//! File-backed replay stream: reads a small CSV dialect and feeds jobs
//! back in file order, optionally looping until a time limit.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::job::{Job, JobId};
use crate::stream::Stream;

#[derive(Clone, Debug)]
struct ReplayRow {
    arrival_delta: f64,
    wall_time: Option<f64>,
    execution_time: f64,
    num_nodes: usize,
    source: String,
    label: Option<String>,
}

enum ParseOutcome {
    Row(ReplayRow),
    ZeroExecutionTime,
    Unparseable,
}

fn parse_line(line: &str) -> ParseOutcome {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let Some(arrival_delta) = fields.first().and_then(|f| f.parse::<f64>().ok()) else {
        return ParseOutcome::Unparseable;
    };

    let (wall_time, execution_time, num_nodes_field) = match fields.len() {
        3 => {
            let Some(exec) = fields[1].parse::<f64>().ok() else {
                return ParseOutcome::Unparseable;
            };
            (None, exec, 2)
        }
        4..=6 => {
            let (Some(wall), Some(exec)) = (fields[1].parse::<f64>().ok(), fields[2].parse::<f64>().ok()) else {
                return ParseOutcome::Unparseable;
            };
            (Some(wall), exec, 3)
        }
        _ => return ParseOutcome::Unparseable,
    };

    let Some(num_nodes) = fields.get(num_nodes_field).and_then(|f| f.parse::<f64>().ok()).map(|f| f as usize) else {
        return ParseOutcome::Unparseable;
    };

    if execution_time == 0.0 {
        return ParseOutcome::ZeroExecutionTime;
    }

    let source = fields.get(4).filter(|_| fields.len() >= 5).map(|s| s.to_string()).unwrap_or_else(|| "replay".to_string());
    let label = fields.get(5).filter(|_| fields.len() >= 6).map(|s| s.to_string());

    ParseOutcome::Row(ReplayRow { arrival_delta, wall_time, execution_time, num_nodes, source, label })
}

/// Replays a fixed file of jobs, looping from the top once `time_limit`
/// is set and the file is exhausted; without a `time_limit` the stream
/// runs through the file exactly once and ends.
pub struct ReplayStream {
    rows: Vec<ReplayRow>,
    idx: usize,
    cumulative_arrival: f64,
    time_limit: Option<f64>,
}

impl ReplayStream {
    pub fn new(path: &Path, time_limit: Option<f64>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                ParseOutcome::Row(row) => rows.push(row),
                ParseOutcome::ZeroExecutionTime => {}
                ParseOutcome::Unparseable => {
                    warn!(line = lineno + 1, path = %path.display(), "skipping unparseable replay line");
                }
            }
        }
        Ok(Self { rows, idx: 0, cumulative_arrival: 0.0, time_limit })
    }
}

impl Stream for ReplayStream {
    fn next(&mut self, job_id: JobId) -> Option<Job> {
        if self.rows.is_empty() {
            return None;
        }
        if self.idx >= self.rows.len() {
            if self.time_limit.is_none() {
                return None;
            }
            self.idx = 0;
        }
        let row = self.rows[self.idx].clone();
        self.idx += 1;
        self.cumulative_arrival += row.arrival_delta;
        if let Some(tl) = self.time_limit {
            if self.cumulative_arrival > tl {
                return None;
            }
        }
        Some(Job::new(
            job_id,
            self.cumulative_arrival,
            row.num_nodes,
            row.execution_time,
            row.wall_time,
            row.source,
            row.label,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.csv");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn three_field_rows_default_wall_time() {
        let (_dir, path) = write_file("0,5,1\n1,2,1\n");
        let mut s = ReplayStream::new(&path, None).unwrap();
        let j0 = s.next(0).unwrap();
        assert_eq!(j0.arrival_timestamp, 0.0);
        assert_eq!(j0.execution_time, 5.0);
        assert_eq!(j0.wall_time, 5.0);
        let j1 = s.next(1).unwrap();
        assert_eq!(j1.arrival_timestamp, 1.0);
        assert_eq!(j1.execution_time, 2.0);
        assert!(s.next(2).is_none());
    }

    #[test]
    fn six_field_rows_carry_source_and_label() {
        let (_dir, path) = write_file("0,10,5,2,gpu,acct-1\n");
        let mut s = ReplayStream::new(&path, None).unwrap();
        let j = s.next(0).unwrap();
        assert_eq!(j.wall_time, 10.0);
        assert_eq!(j.execution_time, 5.0);
        assert_eq!(j.num_nodes, 2);
        assert_eq!(j.source, "gpu");
        assert_eq!(j.label.as_deref(), Some("acct-1"));
    }

    #[test]
    fn skips_zero_execution_time_rows() {
        let (_dir, path) = write_file("0,0,1\n1,5,1\n");
        let mut s = ReplayStream::new(&path, None).unwrap();
        let j = s.next(0).unwrap();
        assert_eq!(j.execution_time, 5.0);
        assert!(s.next(1).is_none());
    }

    #[test]
    fn skips_non_numeric_leading_field() {
        let (_dir, path) = write_file("garbage,line,here\n0,5,1\n");
        let mut s = ReplayStream::new(&path, None).unwrap();
        let j = s.next(0).unwrap();
        assert_eq!(j.execution_time, 5.0);
    }

    #[test]
    fn loops_when_time_limit_is_set() {
        let (_dir, path) = write_file("1,1,1\n");
        let mut s = ReplayStream::new(&path, Some(2.5)).unwrap();
        let j0 = s.next(0).unwrap();
        assert_eq!(j0.arrival_timestamp, 1.0);
        let j1 = s.next(1).unwrap();
        assert_eq!(j1.arrival_timestamp, 2.0);
        assert!(s.next(2).is_none()); // third pass would arrive at 3.0 > 2.5
    }

    #[test]
    fn without_time_limit_runs_once() {
        let (_dir, path) = write_file("1,1,1\n");
        let mut s = ReplayStream::new(&path, None).unwrap();
        assert!(s.next(0).is_some());
        assert!(s.next(1).is_none());
    }
}
