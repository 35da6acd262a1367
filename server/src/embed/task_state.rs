//! Retry state machine for embedding tasks
//!
//! ```text
//! pending ──claim──▶ processing ──succeed──▶ completed
//!                      │   ▲
//!            fail/recover  │ claim (next_retry <= now)
//!                      ▼   │
//!                    failed ──(attempts exhausted)──▶ failed_permanently ──reset──▶ pending
//! ```

use chrono::{DateTime, Duration, FixedOffset};
use derive_more::derive::Display;
use entity::{embedding_task, sea_orm_active_enums::EmbeddingTaskStatus};

use crate::{server_config::EmbeddingConfig, util::truncate_chars};

const MAX_ERROR_CHARS: usize = 1000;
pub const STALE_ERROR: &str = "processing timed out";

pub type Timestamp = DateTime<FixedOffset>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base_secs: i64,
    pub backoff_max_secs: i64,
    pub stale_after_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_secs: 60,
            backoff_max_secs: 3600,
            stale_after_secs: 600,
        }
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base_secs: config.backoff_base_secs,
            backoff_max_secs: config.backoff_max_secs,
            stale_after_secs: config.stale_after_secs,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` failures:
    /// `base * 2^(attempts - 1)`, capped at `backoff_max_secs`.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exp = (attempts - 1).clamp(0, 30) as u32;
        let secs = self
            .backoff_base_secs
            .saturating_mul(1i64 << exp)
            .min(self.backoff_max_secs);
        Duration::seconds(secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::seconds(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Claim,
    Succeed,
    Fail(String),
    /// A processing task whose worker never reported back
    Recover,
    Reset,
}

impl TaskEvent {
    fn name(&self) -> &'static str {
        match self {
            TaskEvent::Claim => "claim",
            TaskEvent::Succeed => "succeed",
            TaskEvent::Fail(_) => "fail",
            TaskEvent::Recover => "recover",
            TaskEvent::Reset => "reset",
        }
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum TransitionError {
    #[display("cannot {event} an embedding task that is {from}")]
    Invalid {
        from: &'static str,
        event: &'static str,
    },
    #[display("embedding task is not due for retry until {_0}")]
    NotDue(Timestamp),
    #[display("embedding task has been processing only since {_0}")]
    NotStale(Timestamp),
}

impl std::error::Error for TransitionError {}

/// The mutable part of an `embedding_task` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub status: EmbeddingTaskStatus,
    pub attempts: i32,
    pub next_retry: Option<Timestamp>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TaskState {
    pub fn pending() -> Self {
        Self {
            status: EmbeddingTaskStatus::Pending,
            attempts: 0,
            next_retry: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.status {
            EmbeddingTaskStatus::Pending => true,
            EmbeddingTaskStatus::Failed => self.next_retry.map_or(true, |t| t <= now),
            _ => false,
        }
    }

    pub fn is_stale(&self, now: Timestamp, policy: &RetryPolicy) -> bool {
        self.status == EmbeddingTaskStatus::Processing
            && self
                .started_at
                .map_or(true, |started| started < now - policy.stale_after())
    }

    fn failed(mut self, error: &str, now: Timestamp, policy: &RetryPolicy) -> Self {
        self.attempts += 1;
        self.error_message = Some(truncate_chars(error, MAX_ERROR_CHARS).to_string());
        if self.attempts >= policy.max_attempts {
            self.status = EmbeddingTaskStatus::FailedPermanently;
            self.next_retry = None;
        } else {
            self.status = EmbeddingTaskStatus::Failed;
            self.next_retry = Some(now + policy.backoff(self.attempts));
        }
        self
    }

    /// Apply `event` at time `now`, returning the next state.
    pub fn transition(
        &self,
        event: TaskEvent,
        now: Timestamp,
        policy: &RetryPolicy,
    ) -> Result<TaskState, TransitionError> {
        use EmbeddingTaskStatus as S;

        let invalid = || TransitionError::Invalid {
            from: self.status.as_str(),
            event: event.name(),
        };

        let next = match (&event, self.status) {
            (TaskEvent::Claim, S::Pending | S::Failed) => {
                if !self.is_due(now) {
                    // is_due is only false for a failed task with a future retry time
                    return Err(TransitionError::NotDue(self.next_retry.unwrap_or(now)));
                }
                TaskState {
                    status: S::Processing,
                    started_at: Some(now),
                    ..self.clone()
                }
            }
            (TaskEvent::Succeed, S::Processing) => TaskState {
                status: S::Completed,
                next_retry: None,
                error_message: None,
                completed_at: Some(now),
                ..self.clone()
            },
            (TaskEvent::Fail(error), S::Processing) => self.clone().failed(error, now, policy),
            (TaskEvent::Recover, S::Processing) => {
                if !self.is_stale(now, policy) {
                    return Err(TransitionError::NotStale(self.started_at.unwrap_or(now)));
                }
                self.clone().failed(STALE_ERROR, now, policy)
            }
            (TaskEvent::Reset, S::FailedPermanently) => TaskState::pending(),
            _ => return Err(invalid()),
        };

        Ok(next)
    }
}

impl From<&embedding_task::Model> for TaskState {
    fn from(task: &embedding_task::Model) -> Self {
        Self {
            status: task.status,
            attempts: task.attempts,
            next_retry: task.next_retry,
            error_message: task.error_message.clone(),
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use EmbeddingTaskStatus as S;

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap().fixed_offset()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn processing(attempts: i32) -> TaskState {
        TaskState {
            status: S::Processing,
            attempts,
            started_at: Some(now()),
            ..TaskState::pending()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::seconds(60));
        assert_eq!(p.backoff(2), Duration::seconds(120));
        assert_eq!(p.backoff(3), Duration::seconds(240));
        assert_eq!(p.backoff(7), Duration::seconds(3600));
        assert_eq!(p.backoff(1000), Duration::seconds(3600));
        assert_eq!(p.backoff(0), Duration::seconds(60));
    }

    #[test]
    fn test_happy_path() {
        let p = policy();
        let claimed = TaskState::pending()
            .transition(TaskEvent::Claim, now(), &p)
            .unwrap();
        assert_eq!(claimed.status, S::Processing);
        assert_eq!(claimed.started_at, Some(now()));
        assert_eq!(claimed.attempts, 0);

        let done = claimed.transition(TaskEvent::Succeed, now(), &p).unwrap();
        assert_eq!(done.status, S::Completed);
        assert_eq!(done.completed_at, Some(now()));
        assert!(done.status.is_terminal());
    }

    #[test]
    fn test_failure_schedules_retry() {
        let p = policy();
        let failed = processing(0)
            .transition(TaskEvent::Fail("timeout".to_string()), now(), &p)
            .unwrap();
        assert_eq!(failed.status, S::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.next_retry, Some(now() + Duration::seconds(60)));
        assert_eq!(failed.error_message.as_deref(), Some("timeout"));

        // Not due yet
        let err = failed.transition(TaskEvent::Claim, now(), &p).unwrap_err();
        assert!(matches!(err, TransitionError::NotDue(_)));

        // Due after the backoff
        let later = now() + Duration::seconds(61);
        let reclaimed = failed.transition(TaskEvent::Claim, later, &p).unwrap();
        assert_eq!(reclaimed.status, S::Processing);
        assert_eq!(reclaimed.attempts, 1);
    }

    #[test]
    fn test_exhausted_attempts_fail_permanently() {
        let p = policy();
        let state = processing(p.max_attempts - 1)
            .transition(TaskEvent::Fail("bad input".to_string()), now(), &p)
            .unwrap();
        assert_eq!(state.status, S::FailedPermanently);
        assert_eq!(state.attempts, p.max_attempts);
        assert_eq!(state.next_retry, None);

        let err = state.transition(TaskEvent::Claim, now(), &p).unwrap_err();
        assert!(matches!(err, TransitionError::Invalid { .. }));
    }

    #[test]
    fn test_reset_permanent_failure() {
        let p = policy();
        let state = TaskState {
            status: S::FailedPermanently,
            attempts: 5,
            error_message: Some("x".to_string()),
            ..TaskState::pending()
        };
        let reset = state.transition(TaskEvent::Reset, now(), &p).unwrap();
        assert_eq!(reset, TaskState::pending());

        // Reset only applies to permanent failures
        assert!(processing(1).transition(TaskEvent::Reset, now(), &p).is_err());
    }

    #[test]
    fn test_recover_only_stale_tasks() {
        let p = policy();
        let fresh = processing(0);
        let err = fresh.transition(TaskEvent::Recover, now(), &p).unwrap_err();
        assert!(matches!(err, TransitionError::NotStale(_)));

        let later = now() + Duration::seconds(p.stale_after_secs + 1);
        let recovered = fresh.transition(TaskEvent::Recover, later, &p).unwrap();
        assert_eq!(recovered.status, S::Failed);
        assert_eq!(recovered.attempts, 1);
        assert_eq!(recovered.error_message.as_deref(), Some(STALE_ERROR));
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let p = policy();
        let completed = TaskState {
            status: S::Completed,
            ..TaskState::pending()
        };
        for event in [
            TaskEvent::Claim,
            TaskEvent::Succeed,
            TaskEvent::Fail("x".to_string()),
            TaskEvent::Recover,
            TaskEvent::Reset,
        ] {
            assert!(completed.transition(event, now(), &p).is_err());
        }
    }

    #[test]
    fn test_error_message_is_truncated() {
        let p = policy();
        let long = "e".repeat(5000);
        let state = processing(0)
            .transition(TaskEvent::Fail(long), now(), &p)
            .unwrap();
        assert_eq!(state.error_message.unwrap().len(), MAX_ERROR_CHARS);
    }

    #[test]
    fn test_error_display() {
        let err = TransitionError::Invalid {
            from: "completed",
            event: "claim",
        };
        assert_eq!(
            err.to_string(),
            "cannot claim an embedding task that is completed"
        );
    }
}
