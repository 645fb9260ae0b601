//! Error types for qss-sim.

use thiserror::Error;

/// Main error type for simulator operations.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("capacity error: {reason}")]
    CapacityError { reason: String },

    #[error("timetable overlap on node {node_id} at t={start}")]
    OverlapError { node_id: usize, start: f64 },

    #[error("validation error for job {job_id}: {reason}")]
    ValidationError { job_id: u64, reason: String },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    pub fn config<S: Into<String>>(reason: S) -> Self {
        SimError::ConfigError { reason: reason.into() }
    }

    pub fn capacity<S: Into<String>>(reason: S) -> Self {
        SimError::CapacityError { reason: reason.into() }
    }

    pub fn validation<S: Into<String>>(job_id: u64, reason: S) -> Self {
        SimError::ValidationError { job_id, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let e = SimError::config("streams must not be empty");
        assert_eq!(e.to_string(), "config error: streams must not be empty");

        let e = SimError::capacity("insufficient idle nodes");
        assert_eq!(e.to_string(), "capacity error: insufficient idle nodes");

        let e = SimError::OverlapError { node_id: 3, start: 5.0 };
        assert_eq!(e.to_string(), "timetable overlap on node 3 at t=5");

        let e = SimError::validation(7, "missing wall_time");
        assert_eq!(e.to_string(), "validation error for job 7: missing wall_time");
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let e: SimError = io.into();
        assert!(matches!(e, SimError::IoError(_)));
    }
}
