use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{DeliveryReference, MessageItem, MessageKind, OwnerId, TargetId};

use crate::error::{Result, SchedulerError};

/// A job that has not been persisted yet, one per composed content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub owner: OwnerId,
    pub target: TargetId,
    pub content: String,
    pub kind: MessageKind,
    pub schedule_time: DateTime<Utc>,
    pub delete_time: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn from_item(
        owner: OwnerId,
        target: TargetId,
        item: &MessageItem,
        schedule_time: DateTime<Utc>,
        delete_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            owner,
            target,
            content: item.content.clone(),
            kind: item.kind,
            schedule_time,
            delete_time,
        }
    }

    /// `delete_time`, when present, must be strictly after `schedule_time`.
    pub fn validate(&self) -> Result<()> {
        match self.delete_time {
            Some(delete_at) if delete_at <= self.schedule_time => {
                Err(SchedulerError::InvariantViolation(format!(
                    "delete_time {} is not after schedule_time {}",
                    delete_at.to_rfc3339(),
                    self.schedule_time.to_rfc3339()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// UUID v7 string, primary key.
    pub id: String,
    pub owner: OwnerId,
    pub target: TargetId,
    /// Literal text, or the platform's media reference.
    pub content: String,
    pub kind: MessageKind,
    pub schedule_time: DateTime<Utc>,
    pub delete_time: Option<DateTime<Utc>>,
    /// Set once, when the send succeeds.
    pub delivery_reference: Option<DeliveryReference>,
    /// Reserved. Never written or read by the scheduler.
    pub recurrence: Option<String>,
    /// ISO-8601 timestamp of job creation.
    pub created_at: String,
}

impl ScheduledJob {
    pub fn is_delivered(&self) -> bool {
        self.delivery_reference.is_some()
    }

    pub fn item(&self) -> MessageItem {
        MessageItem::new(self.content.clone(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(delete_after: Option<i64>) -> NewJob {
        let at = Utc::now();
        NewJob::from_item(
            OwnerId(1),
            TargetId(-1),
            &MessageItem::text("hello"),
            at,
            delete_after.map(|s| at + Duration::seconds(s)),
        )
    }

    #[test]
    fn job_without_delete_time_is_valid() {
        assert!(job(None).validate().is_ok());
    }

    #[test]
    fn delete_time_must_follow_schedule_time() {
        assert!(job(Some(30)).validate().is_ok());
        assert!(job(Some(0)).validate().is_err());
        assert!(job(Some(-30)).validate().is_err());
    }
}
