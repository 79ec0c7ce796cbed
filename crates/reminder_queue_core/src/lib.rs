//! Durable due-event claim queue for scheduled reminders.
//!
//! Reminders are stored with one delivery event each. Pollers lease due
//! events with `claim_due`, then acknowledge or fail them under the returned
//! claim token. All coordination between pollers happens inside SQLite
//! transactions.

pub mod clock;
pub mod config;
pub mod db;
pub mod id;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, QueueConfig, MAX_CLAIM_TIMEOUT_MINUTES};
pub use id::{IdGenerator, SequenceIdGenerator, UuidGenerator};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::reminder::{
    ClaimBatch, ClaimedEvent, EventId, Reminder, ReminderEvent, ReminderId, ReminderStatus,
    ValidationError,
};
pub use repo::reminder_repo::{
    FailOutcome, ReminderListQuery, ReminderRepository, RepoError, RepoResult,
    SqliteReminderRepository, MAX_ATTEMPTS_BEFORE_RELEASE,
};
pub use service::reminder_service::{
    AckSentRequest, AckSentResponse, ClaimDueRequest, ClaimDueResponse, CreateReminderRequest,
    CreatedReminder, FailRequest, FailResponse, ListRemindersRequest, ReminderList,
    ReminderService, ServiceError, ServiceResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
