//! Completion tracking for asynchronous load balancer operations.
//!
//! A network load balancer update returns a work request id. The update is
//! only complete once that work request reaches a terminal status.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::CloudError;

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of status polls before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Reported status of a work request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
    Canceling,
    Canceled,
    Unknown(String),
}

impl OperationStatus {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "ACCEPTED" => OperationStatus::Accepted,
            "IN_PROGRESS" => OperationStatus::InProgress,
            "SUCCEEDED" => OperationStatus::Succeeded,
            "FAILED" => OperationStatus::Failed,
            "CANCELING" => OperationStatus::Canceling,
            "CANCELED" => OperationStatus::Canceled,
            other => OperationStatus::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Accepted => write!(f, "ACCEPTED"),
            OperationStatus::InProgress => write!(f, "IN_PROGRESS"),
            OperationStatus::Succeeded => write!(f, "SUCCEEDED"),
            OperationStatus::Failed => write!(f, "FAILED"),
            OperationStatus::Canceling => write!(f, "CANCELING"),
            OperationStatus::Canceled => write!(f, "CANCELED"),
            OperationStatus::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl<'de> Deserialize<'de> for OperationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_wire(&String::deserialize(deserializer)?))
    }
}

/// Status lookup for work requests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkRequestApi: Send + Sync {
    async fn work_request_status(&self, work_request_id: &str)
    -> Result<OperationStatus, CloudError>;
}

/// Polls a work request until it reaches a terminal status.
#[derive(Clone, Debug)]
pub struct CompletionTracker {
    poll_interval: Duration,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            DEFAULT_MAX_ATTEMPTS,
            CancellationToken::new(),
        )
    }
}

impl CompletionTracker {
    pub fn new(poll_interval: Duration, max_attempts: u32, cancel: CancellationToken) -> Self {
        Self {
            poll_interval,
            max_attempts,
            cancel,
        }
    }

    /// Wait for `work_request_id` to succeed.
    ///
    /// `None` means the update produced nothing to wait for. Cancellation
    /// during a wait between polls returns `CloudError::Cancelled`.
    pub async fn await_completion(
        &self,
        api: &dyn WorkRequestApi,
        work_request_id: Option<&str>,
    ) -> Result<(), CloudError> {
        let Some(id) = work_request_id else {
            debug!("No work request id, nothing to wait for");
            return Ok(());
        };

        info!(work_request_id = %id, "Waiting for work request completion");

        for attempt in 1..=self.max_attempts {
            let status = api.work_request_status(id).await?;
            debug!(work_request_id = %id, status = %status, attempt, "Work request status");

            match status {
                OperationStatus::Succeeded => {
                    info!(work_request_id = %id, attempt, "Work request succeeded");
                    return Ok(());
                }
                OperationStatus::Failed => {
                    warn!(work_request_id = %id, "Work request failed");
                    return Err(CloudError::OperationFailed(id.to_string()));
                }
                OperationStatus::Canceled => {
                    warn!(work_request_id = %id, "Work request was canceled");
                    return Err(CloudError::OperationCanceled(id.to_string()));
                }
                OperationStatus::Accepted
                | OperationStatus::InProgress
                | OperationStatus::Canceling
                | OperationStatus::Unknown(_) => {}
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        warn!(work_request_id = %id, "Wait for work request cancelled");
                        return Err(CloudError::Cancelled(id.to_string()));
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        Err(CloudError::OperationTimedOut {
            id: id.to_string(),
            attempts: self.max_attempts,
        })
    }
}
