/// Run lifecycle definitions for scheduled targets
///
/// A target cycles `Idle -> Due -> Running -> (outcome) -> Idle`; the outcome
/// of each finished run is recorded separately as a `RunOutcome`.
use std::fmt;

/// Where a target currently is in its schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Waiting for `next_run` (or deactivated)
    Idle,

    /// Next run time has passed, a run is about to start
    Due,

    /// Fetch and merge in progress
    Running,
}

impl RunPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Due => "due",
            Self::Running => "running",
        };
        write!(f, "{}", s)
    }
}

/// How a finished run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    /// Everything fetched and merged
    Success,

    /// Some data was fetched and kept, but the run was cut short
    Partial,

    /// Nothing usable was fetched, or most records failed to store
    Failed,
}

impl RunOutcome {
    /// Partial and failed runs both count against the target's failure counter
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Success)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_db_strings() {
        for outcome in [RunOutcome::Success, RunOutcome::Partial, RunOutcome::Failed] {
            assert_eq!(
                RunOutcome::from_db_string(outcome.to_db_string()),
                Some(outcome)
            );
        }
        assert_eq!(RunOutcome::from_db_string("bogus"), None);
    }

    #[test]
    fn test_failure_classification() {
        assert!(!RunOutcome::Success.is_failure());
        assert!(RunOutcome::Partial.is_failure());
        assert!(RunOutcome::Failed.is_failure());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::Running.to_string(), "running");
        assert!(RunPhase::Running.is_running());
        assert!(!RunPhase::Due.is_running());
    }
}
