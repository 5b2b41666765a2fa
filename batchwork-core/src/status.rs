//! Batch status and exit status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status shared by job and step executions.
///
/// Variants are declared in severity order; `upgrade_to` relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Completed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    /// Starting, started or stopping
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    /// Failed, abandoned or unknown
    pub fn is_unsuccessful(&self) -> bool {
        *self >= BatchStatus::Failed
    }

    /// Whether a step in this state will not be touched again
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    /// Combine two statuses, keeping the more severe one.
    ///
    /// Below `Started` a `Completed` wins, so a completed step does not get
    /// downgraded by a job that is still starting.
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        if self > BatchStatus::Started || other > BatchStatus::Started {
            return self.max(other);
        }
        if self == BatchStatus::Completed || other == BatchStatus::Completed {
            return BatchStatus::Completed;
        }
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "COMPLETED" => Ok(BatchStatus::Completed),
            "STARTING" => Ok(BatchStatus::Starting),
            "STARTED" => Ok(BatchStatus::Started),
            "STOPPING" => Ok(BatchStatus::Stopping),
            "STOPPED" => Ok(BatchStatus::Stopped),
            "FAILED" => Ok(BatchStatus::Failed),
            "ABANDONED" => Ok(BatchStatus::Abandoned),
            "UNKNOWN" => Ok(BatchStatus::Unknown),
            _ => Err(format!("Invalid batch status: {}", s)),
        }
    }
}

/// Exit code plus free-form description reported by a finished execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    #[serde(default)]
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    /// Exit status matching a terminal batch status
    pub fn for_status(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::completed(),
            BatchStatus::Stopped | BatchStatus::Stopping => Self::stopped(),
            BatchStatus::Failed | BatchStatus::Abandoned => Self::failed(),
            BatchStatus::Starting | BatchStatus::Started => Self::executing(),
            BatchStatus::Unknown => Self::unknown(),
        }
    }

    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combine with another exit status: the more severe code wins and the
    /// descriptions are concatenated.
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut combined = self.with_description(&other.exit_description);
        if other.severity() > self.severity() {
            combined.exit_code = other.exit_code.clone();
        }
        combined
    }

    /// Append a description, separated by "; "
    pub fn with_description(&self, description: &str) -> ExitStatus {
        let mut result = self.clone();
        if description.is_empty() || self.exit_description == description {
            return result;
        }
        if result.exit_description.is_empty() {
            result.exit_description = description.to_string();
        } else {
            result.exit_description = format!("{}; {}", result.exit_description, description);
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_statuses() {
        assert!(BatchStatus::Starting.is_running());
        assert!(BatchStatus::Stopping.is_running());
        assert!(!BatchStatus::Stopped.is_running());
        assert!(!BatchStatus::Completed.is_running());
    }

    #[test]
    fn test_upgrade_keeps_most_severe() {
        assert_eq!(
            BatchStatus::Completed.upgrade_to(BatchStatus::Failed),
            BatchStatus::Failed
        );
        assert_eq!(
            BatchStatus::Started.upgrade_to(BatchStatus::Completed),
            BatchStatus::Completed
        );
        assert_eq!(
            BatchStatus::Stopping.upgrade_to(BatchStatus::Started),
            BatchStatus::Stopping
        );
    }

    #[test]
    fn test_unsuccessful() {
        assert!(BatchStatus::Failed.is_unsuccessful());
        assert!(BatchStatus::Abandoned.is_unsuccessful());
        assert!(!BatchStatus::Stopped.is_unsuccessful());
    }

    #[test]
    fn test_exit_status_and() {
        let failed = ExitStatus::failed().with_description("boom");
        let combined = ExitStatus::completed().and(&failed);
        assert_eq!(combined.exit_code, ExitStatus::FAILED);
        assert_eq!(combined.exit_description, "boom");

        let still_failed = failed.and(&ExitStatus::completed());
        assert_eq!(still_failed.exit_code, ExitStatus::FAILED);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!("stopping".parse::<BatchStatus>(), Ok(BatchStatus::Stopping));
        assert!("bogus".parse::<BatchStatus>().is_err());
    }
}
