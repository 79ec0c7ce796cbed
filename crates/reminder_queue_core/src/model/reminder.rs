//! Reminder and delivery-event records.
//!
//! # Responsibility
//! - Define the scheduled intent (`Reminder`) and its queue record
//!   (`ReminderEvent`).
//! - Define the read models handed to pollers (`ClaimedEvent`, `ClaimBatch`).
//!
//! # Invariants
//! - `id`, `trigger_at` and `created_at` never change after creation.
//! - `ReminderEvent::sent_at` is terminal: once set it is never cleared.
//! - An empty `ClaimBatch` carries an empty claim token.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Opaque reminder identifier.
pub type ReminderId = String;

/// Opaque delivery-event identifier.
pub type EventId = String;

/// Lifecycle state of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReminderStatus {
    /// Waiting to be delivered; the only status whose events can be claimed.
    Pending,
    /// Cancelled by the owner.
    Cancelled,
    /// Declared for callers; no queue operation assigns it.
    Completed,
}

impl ReminderStatus {
    pub const ALL: [ReminderStatus; 3] = [Self::Pending, Self::Cancelled, Self::Completed];

    /// Stored and external spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Parses a status name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
    }

    /// Comma-separated list of accepted names, for error messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Display for ReminderStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input error tied to one named field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "is required")
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid `{}`: {}", self.field, self.message)
    }
}

impl Error for ValidationError {}

/// A scheduled intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: ReminderId,
    pub title: String,
    pub description: Option<String>,
    pub trigger_at: DateTime<Utc>,
    /// Display hint only.
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Opaque caller payload, stored as-is.
    pub metadata: Option<String>,
}

impl Reminder {
    /// Creates a pending reminder.
    pub fn new(
        id: impl Into<ReminderId>,
        title: impl Into<String>,
        trigger_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            trigger_at,
            timezone: None,
            created_at,
            status: ReminderStatus::Pending,
            metadata: None,
        }
    }

    /// Checks the invariants required before persistence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::missing("id"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::new("title", "must not be empty"));
        }
        Ok(())
    }
}

/// Delivery-queue record owned by a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEvent {
    pub id: EventId,
    pub reminder_id: ReminderId,
    pub trigger_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl ReminderEvent {
    /// Creates the unclaimed event for `reminder`.
    pub fn for_reminder(id: impl Into<EventId>, reminder: &Reminder) -> Self {
        Self {
            id: id.into(),
            reminder_id: reminder.id.clone(),
            trigger_at: reminder.trigger_at,
            claimed_at: None,
            claim_token: None,
            sent_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Returns whether the event has been delivered.
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// Returns whether a lease is still held at `now`.
    ///
    /// A claim whose timeout has lapsed counts as released even though the
    /// stored fields are kept.
    pub fn has_active_claim(&self, now: DateTime<Utc>, claim_timeout: Duration) -> bool {
        match self.claimed_at {
            Some(claimed_at) => now - claimed_at < claim_timeout,
            None => false,
        }
    }
}

/// A due event handed to a poller, joined with its reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedEvent {
    pub event_id: EventId,
    pub reminder_id: ReminderId,
    pub title: String,
    pub description: Option<String>,
    pub trigger_at: DateTime<Utc>,
    pub timezone: Option<String>,
    pub claim_token: String,
}

/// Result of one claim call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBatch {
    /// Empty when `events` is empty.
    pub claim_token: String,
    pub events: Vec<ClaimedEvent>,
}

impl ClaimBatch {
    /// Batch returned when nothing is due or a concurrent claimer won.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_ids(&self) -> Vec<EventId> {
        self.events
            .iter()
            .map(|event| event.event_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Reminder, ReminderEvent, ReminderStatus};
    use crate::model::timestamp::parse_timestamp;
    use chrono::Duration;

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(
            ReminderStatus::parse(" pending "),
            Some(ReminderStatus::Pending)
        );
        assert_eq!(
            ReminderStatus::parse("Cancelled"),
            Some(ReminderStatus::Cancelled)
        );
        assert_eq!(ReminderStatus::parse("done"), None);
        assert_eq!(
            ReminderStatus::valid_names(),
            "PENDING, CANCELLED, COMPLETED"
        );
    }

    #[test]
    fn validate_rejects_blank_title() {
        let at = parse_timestamp("2024-01-01T12:00:00Z").expect("valid timestamp");
        let reminder = Reminder::new("r-1", "   ", at, at);
        let err = reminder.validate().expect_err("blank title must fail");
        assert_eq!(err.field, "title");
    }

    #[test]
    fn claim_is_active_only_before_timeout() {
        let at = parse_timestamp("2024-01-01T12:00:00Z").expect("valid timestamp");
        let reminder = Reminder::new("r-1", "stand-up", at, at);
        let mut event = ReminderEvent::for_reminder("e-1", &reminder);
        let timeout = Duration::minutes(5);

        assert!(!event.has_active_claim(at, timeout));

        event.claimed_at = Some(at);
        assert!(event.has_active_claim(at + Duration::minutes(4), timeout));
        assert!(!event.has_active_claim(at + Duration::minutes(5), timeout));
    }
}
