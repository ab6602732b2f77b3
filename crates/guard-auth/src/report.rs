//! The one-line JSON report printed on stdout before exiting.

use chrono::{DateTime, Utc};
use guard_core::AttemptOutcome;
use serde::{Deserialize, Serialize};

/// Exit status for a verified user.
pub const EXIT_SUCCESS: i32 = 200;

/// Exit status for everything else (failure, timeout, cancel).
pub const EXIT_FAILURE: i32 = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReport {
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl AuthReport {
    pub fn new(outcome: AttemptOutcome, backend: Option<&str>) -> Self {
        Self {
            outcome,
            backend: backend.map(str::to_string),
            finished_at: Utc::now(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.outcome.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    /// Finds the report among the lines of a child's stdout.
    pub fn from_output(stdout: &str) -> Option<Self> {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AuthReport::new(AttemptOutcome::Success, None).exit_code(), 200);
        assert_eq!(AuthReport::new(AttemptOutcome::TimedOut, None).exit_code(), 255);
        assert_eq!(AuthReport::new(AttemptOutcome::failure(), None).exit_code(), 255);
    }

    #[test]
    fn test_report_line_roundtrip() {
        let report = AuthReport::new(AttemptOutcome::Cancelled, Some("helper"));
        let line = serde_json::to_string(&report).unwrap();
        assert!(line.contains("\"result\":\"cancelled\""));

        let output = format!("some noise\n{line}\n");
        assert_eq!(AuthReport::from_output(&output), Some(report));
        assert_eq!(AuthReport::from_output("garbage"), None);
    }
}
