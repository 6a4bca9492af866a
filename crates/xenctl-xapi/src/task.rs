//! Server-side task tracking.
//!
//! Long-running operations (import, export) are bound to a `task` object the
//! client creates up front. The engine polls `task.get_record` until the
//! status is terminal or the attempt budget runs out, and always destroys
//! the task afterwards.

use crate::error::{XenError, XenResult};
use crate::session::Session;
use crate::types::{decode_record, ObjectRef, TaskRecord, TaskStatus, XenConfig};

use log::{debug, trace, warn};
use std::future::Future;
use std::time::Duration;

/// How often and how long to poll a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

impl From<&XenConfig> for PollPolicy {
    fn from(config: &XenConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.poll_max_attempts,
        }
    }
}

/// Result of polling: a terminal record, or the last in-flight record seen.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Finished(TaskRecord),
    TimedOut(TaskRecord),
}

impl PollOutcome {
    pub fn record(&self) -> &TaskRecord {
        match self {
            Self::Finished(r) | Self::TimedOut(r) => r,
        }
    }
}

/// Value produced by a task-bound action, with the task's final record.
#[derive(Debug, Clone)]
pub struct TaskRun<T> {
    pub value: T,
    pub record: TaskRecord,
}

pub struct TaskEngine<'a> {
    session: &'a Session,
}

impl<'a> TaskEngine<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn create(&self, label: &str, description: &str) -> XenResult<ObjectRef> {
        let task = self
            .session
            .call("task.create", vec![label.into(), description.into()])
            .await?
            .into_ref()?;
        debug!("created task {} ({})", task, label);
        Ok(task)
    }

    pub async fn get_record(&self, task: &ObjectRef) -> XenResult<TaskRecord> {
        let value = self.session.call("task.get_record", vec![task.into()]).await?;
        decode_record(value)
    }

    /// Poll until the task reaches `success`, `failure` or `cancelled`.
    ///
    /// A task that went back to `pending` after leaving it is an error.
    pub async fn poll_until_terminal(&self, task: &ObjectRef) -> XenResult<PollOutcome> {
        let policy = self.session.poll_policy();
        let attempts = policy.max_attempts.max(1);
        let mut left_pending = false;
        let mut last = TaskRecord::default();

        for attempt in 1..=attempts {
            let record = self.get_record(task).await?;
            match record.status {
                TaskStatus::Pending if left_pending => {
                    return Err(XenError::task_failure(
                        format!("task {task} status regressed to pending"),
                        record.error_info,
                    ));
                }
                TaskStatus::Pending => {}
                _ => left_pending = true,
            }
            trace!(
                "task {} attempt {}/{}: {:?} {:.0}%",
                task,
                attempt,
                attempts,
                record.status,
                record.progress * 100.0
            );
            if record.status.is_terminal() {
                return Ok(PollOutcome::Finished(record));
            }
            last = record;
            if attempt < attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        warn!("task {} still {:?} after {} polls", task, last.status, attempts);
        Ok(PollOutcome::TimedOut(last))
    }

    pub async fn destroy(&self, task: &ObjectRef) -> XenResult<()> {
        self.session.call("task.destroy", vec![task.into()]).await?;
        debug!("destroyed task {}", task);
        Ok(())
    }

    /// create → `action(task)` → poll → destroy.
    ///
    /// Polling and destruction happen even when the action fails; the
    /// action's error is returned afterwards. A failed `task.destroy` is
    /// logged, not returned.
    pub async fn run<T, F, Fut>(&self, label: &str, description: &str, action: F) -> XenResult<TaskRun<T>>
    where
        F: FnOnce(ObjectRef) -> Fut,
        Fut: Future<Output = XenResult<T>>,
    {
        let task = self.create(label, description).await?;
        let acted = action(task.clone()).await;
        let polled = self.poll_until_terminal(&task).await;
        if let Err(e) = self.destroy(&task).await {
            warn!("could not destroy task {}: {}", task, e);
        }

        let value = acted?;
        let record = settle(&task, polled?)?;
        Ok(TaskRun { value, record })
    }
}

/// Map a poll outcome to the task's final record or an error.
pub fn settle(task: &ObjectRef, outcome: PollOutcome) -> XenResult<TaskRecord> {
    match outcome {
        PollOutcome::Finished(record) => match record.status {
            TaskStatus::Success => Ok(record),
            TaskStatus::Cancelled => Err(XenError::task_failure(
                format!("task {task} was cancelled"),
                record.error_info,
            )),
            _ => Err(XenError::task_failure(
                format!("task {task} failed"),
                record.error_info,
            )),
        },
        PollOutcome::TimedOut(record) => Err(XenError::timeout(format!(
            "task {task} did not finish (last status {:?}, {:.0}%)",
            record.status,
            record.progress * 100.0
        ))),
    }
}
