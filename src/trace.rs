//! Append-only trace of queue/service occupancy, optionally mirrored to
//! a file in the fixed five-field line format.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Arrival,
    Submission,
    Completion,
    Unspecified,
}

impl Action {
    pub fn code(self) -> char {
        match self {
            Action::Arrival => 'a',
            Action::Submission => 's',
            Action::Completion => 'c',
            Action::Unspecified => '-',
        }
    }
}

#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub timestamp: f64,
    pub queue_length: usize,
    pub jobs_in_service: usize,
    pub action: Action,
    pub queue_by_source_with_buffer: BTreeMap<String, usize>,
    pub queue_by_source: BTreeMap<String, usize>,
    pub service_by_source: BTreeMap<String, usize>,
}

fn format_counts(counts: &BTreeMap<String, usize>) -> String {
    counts.iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(",")
}

fn format_line(entry: &TraceEntry) -> String {
    format!(
        "{:>15.6} - {} - {} - {} - {}",
        entry.timestamp,
        format_counts(&entry.queue_by_source_with_buffer),
        format_counts(&entry.queue_by_source),
        format_counts(&entry.service_by_source),
        entry.action.code(),
    )
}

pub struct Trace {
    entries: Vec<TraceEntry>,
    writer: Option<BufWriter<File>>,
}

impl Trace {
    pub fn new() -> Self {
        Self { entries: Vec::new(), writer: None }
    }

    pub fn with_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { entries: Vec::new(), writer: Some(BufWriter::new(file)) })
    }

    pub fn record(&mut self, entry: TraceEntry) -> Result<()> {
        if let Some(w) = &mut self.writer {
            writeln!(w, "{}", format_line(&entry))?;
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&TraceEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: f64, action: Action) -> TraceEntry {
        TraceEntry {
            timestamp: ts,
            queue_length: 0,
            jobs_in_service: 0,
            action,
            queue_by_source_with_buffer: BTreeMap::new(),
            queue_by_source: BTreeMap::new(),
            service_by_source: BTreeMap::new(),
        }
    }

    #[test]
    fn records_preserve_insertion_order() {
        let mut t = Trace::new();
        t.record(entry(0.0, Action::Arrival)).unwrap();
        t.record(entry(1.0, Action::Submission)).unwrap();
        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.first().unwrap().timestamp, 0.0);
        assert_eq!(t.last().unwrap().timestamp, 1.0);
    }

    #[test]
    fn action_codes_match_single_letters() {
        assert_eq!(Action::Arrival.code(), 'a');
        assert_eq!(Action::Submission.code(), 's');
        assert_eq!(Action::Completion.code(), 'c');
        assert_eq!(Action::Unspecified.code(), '-');
    }

    #[test]
    fn format_line_renders_sorted_label_counts() {
        let mut e = entry(2.5, Action::Submission);
        e.queue_by_source.insert("B".to_string(), 2);
        e.queue_by_source.insert("A".to_string(), 1);
        let line = format_line(&e);
        assert!(line.contains("A:1,B:2"));
        assert!(line.ends_with(" - s"));
    }

    #[test]
    fn with_file_appends_formatted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        {
            let mut t = Trace::with_file(&path).unwrap();
            t.record(entry(0.0, Action::Arrival)).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
