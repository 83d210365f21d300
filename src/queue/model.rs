use crate::orchestration::ErrorCode;
use crate::shared::ids::{AgentId, AssignmentId, JobId, NodeId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Stored rank; claims order by rank descending.
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Result<Self, String> {
        match rank {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            3 => Ok(Self::Urgent),
            other => Err(format!("unknown priority rank {other}")),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!(
                "unknown priority `{other}` (expected urgent|high|normal|low)"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Assigned)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Assigned, JobStatus::Running)
                | (JobStatus::Assigned, JobStatus::Cancelled)
                | (JobStatus::Assigned, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }

    /// `failed` counts as terminal here; a requeue is a new lifetime, not a revival.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "pending" => Ok(JobStatus::Pending),
            "assigned" => Ok(JobStatus::Assigned),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_active(self) -> bool {
        matches!(self, AssignmentStatus::Assigned | AssignmentStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Running => "running",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Failed => "failed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "assigned" => Ok(AssignmentStatus::Assigned),
            "running" => Ok(AssignmentStatus::Running),
            "completed" => Ok(AssignmentStatus::Completed),
            "failed" => Ok(AssignmentStatus::Failed),
            "cancelled" => Ok(AssignmentStatus::Cancelled),
            other => Err(format!("unknown assignment status `{other}`")),
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: JobId,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub params: Map<String, Value>,
    pub priority: Priority,
    pub max_attempts: u32,
    pub attempts: u32,
    pub status: JobStatus,
    pub cancel_requested: bool,
    pub error_code: Option<ErrorCode>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Job {
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub job_id: JobId,
    pub agent_id: AgentId,
    pub node_id: NodeId,
    pub attempt: u32,
    pub status: AssignmentStatus,
    pub progress: u8,
    pub error_code: Option<ErrorCode>,
    pub error: Option<String>,
    pub assigned_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Submission request. `workflow_version` of `None` pins the latest deployed version.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub workflow_id: WorkflowId,
    pub workflow_version: Option<u32>,
    pub params: Map<String, Value>,
    pub priority: Priority,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            workflow_version: None,
            params: Map::new(),
            priority: Priority::Normal,
            max_attempts: 1,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_transitions_follow_lifecycle() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Assigned.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn priority_orders_urgent_first() {
        let mut all = vec![Priority::Low, Priority::Urgent, Priority::Normal, Priority::High];
        all.sort_by_key(|p| std::cmp::Reverse(p.rank()));
        assert_eq!(
            all,
            vec![Priority::Urgent, Priority::High, Priority::Normal, Priority::Low]
        );
        assert_eq!(Priority::parse("HIGH").expect("parse"), Priority::High);
        assert!(Priority::parse("asap").is_err());
    }
}
