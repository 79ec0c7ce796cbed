//! Reminder queue use-case service.
//!
//! # Responsibility
//! - Parse timestamps, status filters and required fields from caller input.
//! - Fill defaults (`limit`, `now`, `sent_at`) from config and the injected
//!   clock.
//! - Delegate every state change to a `ReminderRepository`.
//!
//! # Invariants
//! - "Now" always comes from the `Clock`, never from storage.
//! - An empty claim response always has an empty `claimToken`.

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::id::IdGenerator;
use crate::model::reminder::{
    ClaimedEvent, EventId, Reminder, ReminderEvent, ReminderId, ReminderStatus, ValidationError,
};
use crate::model::timestamp::parse_timestamp;
use crate::repo::reminder_repo::{RepoError, ReminderListQuery, ReminderRepository};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Failure surfaced to service callers.
#[derive(Debug)]
pub enum ServiceError {
    /// Caller input is malformed; retrying the same input will fail again.
    Validation(ValidationError),
    /// Referenced reminder does not exist.
    NotFound(ReminderId),
    /// Storage failure; the transaction was rolled back and can be retried.
    Storage(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "reminder not found: {id}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::NotFound(_) => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Storage(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateReminderRequest {
    pub title: String,
    pub description: Option<String>,
    /// RFC3339 timestamp.
    pub trigger_at: String,
    pub timezone: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedReminder {
    pub id: ReminderId,
    pub trigger_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRemindersRequest {
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderList {
    pub reminders: Vec<Reminder>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimDueRequest {
    pub claimer_id: String,
    /// Defaults to the service clock.
    pub now: Option<String>,
    /// Defaults to `QueueConfig::default_claim_limit`.
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDueResponse {
    pub claim_token: String,
    pub events: Vec<ClaimedEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AckSentRequest {
    pub claim_token: String,
    pub event_ids: Vec<EventId>,
    /// Defaults to the service clock.
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckSentResponse {
    pub acknowledged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailRequest {
    pub claim_token: String,
    pub event_ids: Vec<EventId>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailResponse {
    pub failed: usize,
}

/// Validating facade over a reminder repository.
pub struct ReminderService<R: ReminderRepository> {
    repo: R,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: QueueConfig,
}

impl<R: ReminderRepository> ReminderService<R> {
    /// Creates a service with default `QueueConfig`.
    pub fn new(repo: R, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            repo,
            clock,
            ids,
            config: QueueConfig::default(),
        }
    }

    /// Replaces the queue configuration.
    ///
    /// # Errors
    /// - Rejects configs that fail `QueueConfig::validate`.
    pub fn with_config(mut self, config: QueueConfig) -> ServiceResult<Self> {
        config
            .validate()
            .map_err(|err| ValidationError::new("config", err.to_string()))?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Schedules a reminder and enqueues its single delivery event.
    pub fn create(&self, request: &CreateReminderRequest) -> ServiceResult<CreatedReminder> {
        let title = require("title", &request.title)?;
        let trigger_at = require_timestamp("triggerAt", &request.trigger_at)?;

        let mut reminder = Reminder::new(self.ids.next_id(), title, trigger_at, self.clock.now());
        reminder.description = request.description.clone();
        reminder.timezone = request.timezone.clone();
        reminder.metadata = request.metadata.clone();
        let event = ReminderEvent::for_reminder(self.ids.next_id(), &reminder);

        self.repo.create_reminder(&reminder, &event)?;
        Ok(CreatedReminder {
            id: reminder.id,
            trigger_at: reminder.trigger_at,
        })
    }

    /// Fetches one reminder.
    pub fn get(&self, id: &str) -> ServiceResult<Reminder> {
        let id = require("id", id)?;
        self.repo
            .get_reminder(&id)?
            .ok_or(ServiceError::NotFound(id))
    }

    /// Lists reminders matching optional status and trigger-time range.
    pub fn list(&self, request: &ListRemindersRequest) -> ServiceResult<ReminderList> {
        let query = ReminderListQuery {
            status: request.status.as_deref().map(parse_status).transpose()?,
            from: optional_timestamp("from", request.from.as_deref())?,
            to: optional_timestamp("to", request.to.as_deref())?,
            limit: request.limit,
        };
        let reminders = self.repo.list_reminders(&query)?;
        Ok(ReminderList { reminders })
    }

    /// Cancels a reminder. Returns whether it was found.
    pub fn cancel(&self, id: &str) -> ServiceResult<bool> {
        let id = require("id", id)?;
        Ok(self.repo.cancel_reminder(&id)?)
    }

    /// Leases due events to `claimer_id`.
    ///
    /// Nothing due and losing a race to another poller both yield an empty
    /// response; callers simply poll again later.
    pub fn claim_due(&self, request: &ClaimDueRequest) -> ServiceResult<ClaimDueResponse> {
        let claimer_id = require("claimerId", &request.claimer_id)?;
        let now = self.now_or("now", request.now.as_deref())?;
        let limit = request.limit.unwrap_or(self.config.default_claim_limit);

        let batch = self.repo.claim_due_events(
            now,
            limit,
            &claimer_id,
            self.config.claim_timeout_minutes,
        )?;
        debug!(
            "event=claim_due module=service status=ok claimer_id={} limit={} claimed={}",
            claimer_id,
            limit,
            batch.events.len()
        );
        Ok(ClaimDueResponse {
            claim_token: batch.claim_token,
            events: batch.events,
        })
    }

    /// Acknowledges delivery of leased events. Repeats return zero.
    pub fn ack_sent(&self, request: &AckSentRequest) -> ServiceResult<AckSentResponse> {
        let claim_token = require("claimToken", &request.claim_token)?;
        let event_ids = require_ids(&request.event_ids)?;
        let sent_at = self.now_or("sentAt", request.sent_at.as_deref())?;

        let acknowledged = self
            .repo
            .acknowledge_sent(&claim_token, &event_ids, sent_at)?;
        Ok(AckSentResponse { acknowledged })
    }

    /// Reports a delivery failure for leased events.
    pub fn fail(&self, request: &FailRequest) -> ServiceResult<FailResponse> {
        let claim_token = require("claimToken", &request.claim_token)?;
        let event_ids = require_ids(&request.event_ids)?;
        let error = require("error", &request.error)?;

        let outcome = self.repo.mark_failed(
            &claim_token,
            &event_ids,
            &error,
            self.clock.now(),
            self.config.claim_timeout_minutes,
        )?;
        Ok(FailResponse {
            failed: outcome.failed,
        })
    }

    fn now_or(&self, field: &'static str, value: Option<&str>) -> ServiceResult<DateTime<Utc>> {
        match value {
            Some(text) => Ok(require_timestamp(field, text)?),
            None => Ok(self.clock.now()),
        }
    }
}

/// Parses a status filter, accepting any letter case.
pub fn parse_status(value: &str) -> Result<ReminderStatus, ValidationError> {
    ReminderStatus::parse(value).ok_or_else(|| {
        ValidationError::new(
            "status",
            format!(
                "unknown status `{}`; expected one of {}",
                value.trim(),
                ReminderStatus::valid_names()
            ),
        )
    })
}

fn require(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(trimmed.to_string())
}

fn require_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    let text = require(field, value)?;
    parse_timestamp(&text).ok_or_else(|| {
        ValidationError::new(
            field,
            format!("`{text}` is not an RFC3339 timestamp (e.g. 2024-01-01T12:00:00Z)"),
        )
    })
}

fn optional_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    value
        .map(|text| require_timestamp(field, text))
        .transpose()
}

fn require_ids(ids: &[EventId]) -> Result<Vec<EventId>, ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::missing("eventIds"));
    }
    ids.iter()
        .map(|id| {
            require("eventIds", id)
                .map_err(|_| ValidationError::new("eventIds", "must not contain blank ids"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_status, require_ids};
    use crate::model::reminder::ReminderStatus;

    #[test]
    fn parse_status_normalizes_case() {
        assert_eq!(
            parse_status("completed").expect("known status"),
            ReminderStatus::Completed
        );
    }

    #[test]
    fn parse_status_lists_valid_options() {
        let err = parse_status("archived").expect_err("unknown status must fail");
        assert_eq!(err.field, "status");
        assert!(err.message.contains("PENDING, CANCELLED, COMPLETED"));
    }

    #[test]
    fn require_ids_rejects_empty_and_blank() {
        assert!(require_ids(&[]).is_err());
        assert!(require_ids(&["e-1".to_string(), " ".to_string()]).is_err());
        assert_eq!(
            require_ids(&[" e-1 ".to_string()]).expect("valid ids"),
            vec!["e-1".to_string()]
        );
    }
}
