use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Component identifiers the client knows how to display.
const CANONICAL_STEPS: &[&str] = &[
    "frontend",
    "backend",
    "gitea",
    "confluence",
    "jira",
    "artifactory",
    "github",
];

/// Order used when no selection is active.
const DEFAULT_ORDER: &[&str] = &["frontend", "backend"];

pub fn is_canonical(id: &str) -> bool {
    let id = id.trim().to_ascii_lowercase();
    CANONICAL_STEPS.contains(&id.as_str())
}

/// Selection in the order the triggering action gave it, case-folded, with
/// unknown ids and repeats removed. Falls back to `frontend, backend`.
pub fn canonical_order<S: AsRef<str>>(selection: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let ordered: Vec<String> = selection
        .iter()
        .map(|id| id.as_ref().trim().to_ascii_lowercase())
        .filter(|id| is_canonical(id))
        .filter(|id| seen.insert(id.clone()))
        .collect();
    if ordered.is_empty() && selection.is_empty() {
        return DEFAULT_ORDER.iter().map(|id| id.to_string()).collect();
    }
    ordered
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Running,
    Unknown,
    Success,
    Done,
    Failure,
    Cancelled,
    InternalError,
    Timeout,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Unknown => "UNKNOWN",
            Self::Success => "SUCCESS",
            Self::Done => "DONE",
            Self::Failure => "FAILURE",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Backend values are matched upper-cased; anything unrecognized is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "SUCCESS" => Self::Success,
            "DONE" => Self::Done,
            "FAILURE" => Self::Failure,
            "CANCELLED" => Self::Cancelled,
            "INTERNAL_ERROR" => Self::InternalError,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running | Self::Unknown)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub status: StepStatus,
}

/// Steps of the current operation, kept in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSet {
    steps: Vec<Step>,
}

impl StepSet {
    pub fn seed(order: &[String]) -> Self {
        Self {
            steps: order
                .iter()
                .map(|id| Step {
                    id: id.clone(),
                    status: StepStatus::Running,
                })
                .collect(),
        }
    }

    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn terminal_count(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_terminal()).count()
    }

    /// Record the latest observed status for `id`. Returns whether anything
    /// changed. Ids outside this operation are dropped, and a terminal step
    /// never goes back to a non-terminal status.
    pub fn apply(&mut self, id: &str, raw_status: &str) -> bool {
        if !is_canonical(id) {
            return false;
        }
        let id = id.trim().to_ascii_lowercase();
        let status = StepStatus::parse(raw_status);
        let Some(step) = self.steps.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        if step.status.is_terminal() && !status.is_terminal() {
            tracing::debug!(
                "Ignoring regression of step '{}' from {} to {}",
                id,
                step.status,
                status
            );
            return false;
        }
        if step.status == status {
            return false;
        }
        step.status = status;
        true
    }
}
