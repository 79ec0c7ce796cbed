//! Reminder repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist reminders together with their delivery events.
//! - Hand due events to pollers under a time-bounded lease.
//! - Record delivery acknowledgements and failures.
//!
//! # Invariants
//! - A claim token is fresh per `claim_due_events` call; only rows updated
//!   under that token are returned.
//! - Eligibility (`sent_at IS NULL`, lease absent or expired) is re-applied in
//!   the claiming `UPDATE`; a zero row count means another poller won.
//! - `sent_at` is only ever written where it is still `NULL`.

use crate::config::MAX_CLAIM_TIMEOUT_MINUTES;
use crate::db::migrations::{current_version, latest_version};
use crate::db::DbError;
use crate::id::{IdGenerator, UuidGenerator};
use crate::model::reminder::{
    ClaimBatch, ClaimedEvent, EventId, Reminder, ReminderEvent, ReminderId, ReminderStatus,
    ValidationError,
};
use crate::model::timestamp::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Post-increment attempt count at which a failing event's lease is dropped.
pub const MAX_ATTEMPTS_BEFORE_RELEASE: u32 = 3;

/// Ids bound per `IN (...)` list; larger inputs are split inside one
/// transaction to stay under SQLite's host parameter limit.
const MAX_IDS_PER_STATEMENT: usize = 500;

const REMINDER_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    trigger_at,
    timezone,
    created_at,
    status,
    metadata_json
FROM reminders";

const EVENT_SELECT_SQL: &str = "SELECT
    id,
    reminder_id,
    trigger_at,
    claimed_at,
    claim_token,
    sent_at,
    attempts,
    last_error
FROM reminder_events";

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "reminders",
        &[
            "id",
            "title",
            "description",
            "trigger_at",
            "timezone",
            "created_at",
            "status",
            "metadata_json",
        ],
    ),
    (
        "reminder_events",
        &[
            "id",
            "reminder_id",
            "trigger_at",
            "claimed_at",
            "claim_token",
            "sent_at",
            "attempts",
            "last_error",
        ],
    ),
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for reminder persistence and queue operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted queue data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}; open it with db::open_db"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Filter options for listing reminders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderListQuery {
    pub status: Option<ReminderStatus>,
    /// Inclusive lower bound on `trigger_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `trigger_at`.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Counts reported by `mark_failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailOutcome {
    /// Rows whose attempt counter was incremented.
    pub failed: usize,
    /// Rows whose lease was dropped because they hit the attempt threshold.
    pub released: usize,
    /// Rows reported after their lease had already lapsed.
    pub late: usize,
}

/// Data access contract for the due-event claim queue.
pub trait ReminderRepository {
    /// Inserts a reminder and its event atomically.
    fn create_reminder(&self, reminder: &Reminder, event: &ReminderEvent) -> RepoResult<()>;
    /// Gets one reminder by id.
    fn get_reminder(&self, id: &str) -> RepoResult<Option<Reminder>>;
    /// Lists reminders ordered by `trigger_at` ascending.
    fn list_reminders(&self, query: &ReminderListQuery) -> RepoResult<Vec<Reminder>>;
    /// Lists every event of one reminder, delivered ones included.
    fn list_events(&self, reminder_id: &str) -> RepoResult<Vec<ReminderEvent>>;
    /// Cancels a reminder and drops its undelivered events.
    ///
    /// Returns whether the reminder exists.
    fn cancel_reminder(&self, id: &str) -> RepoResult<bool>;
    /// Leases up to `limit` due events to one caller.
    ///
    /// # Errors
    /// - `Validation` when `claim_timeout_minutes` is outside
    ///   `1..=MAX_CLAIM_TIMEOUT_MINUTES`.
    fn claim_due_events(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        claimer_id: &str,
        claim_timeout_minutes: i64,
    ) -> RepoResult<ClaimBatch>;
    /// Marks leased events as delivered. Returns rows updated.
    fn acknowledge_sent(
        &self,
        claim_token: &str,
        event_ids: &[EventId],
        sent_at: DateTime<Utc>,
    ) -> RepoResult<usize>;
    /// Records a delivery failure for leased events.
    ///
    /// Rejects an out-of-range `claim_timeout_minutes` like `claim_due_events`.
    fn mark_failed(
        &self,
        claim_token: &str,
        event_ids: &[EventId],
        error: &str,
        now: DateTime<Utc>,
        claim_timeout_minutes: i64,
    ) -> RepoResult<FailOutcome>;
}

/// SQLite-backed reminder repository.
///
/// Borrows one connection; pollers in other threads or processes use their
/// own connections to the same database file.
pub struct SqliteReminderRepository<'conn> {
    conn: &'conn Connection,
    tokens: Arc<dyn IdGenerator>,
}

impl<'conn> SqliteReminderRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations were not applied.
    /// - `MissingRequiredTable`/`MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            tokens: Arc::new(UuidGenerator),
        })
    }

    /// Replaces the generator used for claim tokens.
    pub fn with_id_generator(mut self, tokens: Arc<dyn IdGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    fn begin(&self) -> RepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl ReminderRepository for SqliteReminderRepository<'_> {
    fn create_reminder(&self, reminder: &Reminder, event: &ReminderEvent) -> RepoResult<()> {
        reminder.validate()?;
        if event.reminder_id != reminder.id {
            return Err(ValidationError::new(
                "reminderId",
                format!("event belongs to `{}`, not `{}`", event.reminder_id, reminder.id),
            )
            .into());
        }

        let tx = self.begin()?;
        tx.execute(
            "INSERT INTO reminders (
                id,
                title,
                description,
                trigger_at,
                timezone,
                created_at,
                status,
                metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                reminder.id.as_str(),
                reminder.title.as_str(),
                reminder.description.as_deref(),
                format_timestamp(reminder.trigger_at),
                reminder.timezone.as_deref(),
                format_timestamp(reminder.created_at),
                reminder.status.as_str(),
                reminder.metadata.as_deref(),
            ],
        )?;
        tx.execute(
            "INSERT INTO reminder_events (
                id,
                reminder_id,
                trigger_at,
                claimed_at,
                claim_token,
                sent_at,
                attempts,
                last_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                event.id.as_str(),
                event.reminder_id.as_str(),
                format_timestamp(event.trigger_at),
                event.claimed_at.map(format_timestamp),
                event.claim_token.as_deref(),
                event.sent_at.map(format_timestamp),
                event.attempts,
                event.last_error.as_deref(),
            ],
        )?;
        tx.commit()?;

        info!(
            "event=reminder_create module=repo status=ok reminder_id={} event_id={}",
            reminder.id, event.id
        );
        Ok(())
    }

    fn get_reminder(&self, id: &str) -> RepoResult<Option<Reminder>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{REMINDER_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_reminder_row(row)?));
        }
        Ok(None)
    }

    fn list_reminders(&self, query: &ReminderListQuery) -> RepoResult<Vec<Reminder>> {
        let mut sql = format!("{REMINDER_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(from) = query.from {
            sql.push_str(" AND trigger_at >= ?");
            bind_values.push(Value::Text(format_timestamp(from)));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND trigger_at <= ?");
            bind_values.push(Value::Text(format_timestamp(to)));
        }

        sql.push_str(" ORDER BY trigger_at ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut reminders = Vec::new();
        while let Some(row) = rows.next()? {
            reminders.push(parse_reminder_row(row)?);
        }

        debug!(
            "event=reminder_list module=repo status=ok count={}",
            reminders.len()
        );
        Ok(reminders)
    }

    fn list_events(&self, reminder_id: &str) -> RepoResult<Vec<ReminderEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EVENT_SELECT_SQL}
             WHERE reminder_id = ?1
             ORDER BY trigger_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([reminder_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }
        Ok(events)
    }

    fn cancel_reminder(&self, id: &str) -> RepoResult<bool> {
        let tx = self.begin()?;
        let changed = tx.execute(
            "UPDATE reminders
             SET status = 'CANCELLED'
             WHERE id = ?1;",
            [id],
        )?;
        let removed = tx.execute(
            "DELETE FROM reminder_events
             WHERE reminder_id = ?1
               AND sent_at IS NULL;",
            [id],
        )?;
        tx.commit()?;

        info!(
            "event=reminder_cancel module=repo status=ok reminder_id={} found={} removed_events={}",
            id,
            changed > 0,
            removed
        );
        Ok(changed > 0)
    }

    fn claim_due_events(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        claimer_id: &str,
        claim_timeout_minutes: i64,
    ) -> RepoResult<ClaimBatch> {
        let started_at = Instant::now();
        let expiry_boundary = lease_expiry_boundary(now, claim_timeout_minutes)?;
        if limit == 0 {
            return Ok(ClaimBatch::empty());
        }

        let claim_token = format!("{claimer_id}:{}", self.tokens.next_id());
        let now_text = format_timestamp(now);

        let tx = self.begin()?;
        let candidates = select_claimable_ids(&tx, &now_text, &expiry_boundary, limit)?;
        if candidates.is_empty() {
            debug!(
                "event=claim_due module=repo status=empty claimer_id={} duration_ms={}",
                claimer_id,
                started_at.elapsed().as_millis()
            );
            return Ok(ClaimBatch::empty());
        }

        let batch = lease_and_load(&tx, &candidates, &now_text, &expiry_boundary, &claim_token)?;
        if batch.is_empty() {
            info!(
                "event=claim_due module=repo status=lost_race claimer_id={} candidates={} duration_ms={}",
                claimer_id,
                candidates.len(),
                started_at.elapsed().as_millis()
            );
            return Ok(batch);
        }
        tx.commit()?;

        info!(
            "event=claim_due module=repo status=ok claimer_id={} claimed={} duration_ms={}",
            claimer_id,
            batch.events.len(),
            started_at.elapsed().as_millis()
        );
        Ok(batch)
    }

    fn acknowledge_sent(
        &self,
        claim_token: &str,
        event_ids: &[EventId],
        sent_at: DateTime<Utc>,
    ) -> RepoResult<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let sent_text = format_timestamp(sent_at);
        let tx = self.begin()?;
        let mut acknowledged = 0;
        for chunk in event_ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut bind_values = vec![
                Value::Text(sent_text.clone()),
                Value::Text(claim_token.to_string()),
            ];
            bind_values.extend(id_values(chunk));

            acknowledged += tx.execute(
                &format!(
                    "UPDATE reminder_events
                     SET sent_at = ?
                     WHERE claim_token = ?
                       AND sent_at IS NULL
                       AND id IN ({});",
                    placeholders(chunk.len())
                ),
                params_from_iter(bind_values),
            )?;
        }
        tx.commit()?;

        info!(
            "event=ack_sent module=repo status=ok requested={} acknowledged={}",
            event_ids.len(),
            acknowledged
        );
        Ok(acknowledged)
    }

    fn mark_failed(
        &self,
        claim_token: &str,
        event_ids: &[EventId],
        error: &str,
        now: DateTime<Utc>,
        claim_timeout_minutes: i64,
    ) -> RepoResult<FailOutcome> {
        let expiry_boundary = lease_expiry_boundary(now, claim_timeout_minutes)?;
        if event_ids.is_empty() {
            return Ok(FailOutcome::default());
        }

        let threshold = i64::from(MAX_ATTEMPTS_BEFORE_RELEASE);
        let tx = self.begin()?;

        let mut outcome = FailOutcome::default();
        for chunk in event_ids.chunks(MAX_IDS_PER_STATEMENT) {
            for (attempts, claimed_at) in load_leased_state(&tx, claim_token, chunk)? {
                if attempts + 1 >= MAX_ATTEMPTS_BEFORE_RELEASE {
                    outcome.released += 1;
                }
                if claimed_at.is_some_and(|value| value < expiry_boundary) {
                    outcome.late += 1;
                }
            }

            let mut bind_values = vec![
                Value::Text(error.to_string()),
                Value::Integer(threshold),
                Value::Integer(threshold),
                Value::Text(claim_token.to_string()),
            ];
            bind_values.extend(id_values(chunk));

            // SET expressions read the pre-update row, so `attempts + 1` is the
            // post-increment count.
            outcome.failed += tx.execute(
                &format!(
                    "UPDATE reminder_events
                     SET
                        attempts = attempts + 1,
                        last_error = ?,
                        claimed_at = CASE WHEN attempts + 1 >= ? THEN NULL ELSE claimed_at END,
                        claim_token = CASE WHEN attempts + 1 >= ? THEN NULL ELSE claim_token END
                     WHERE claim_token = ?
                       AND id IN ({});",
                    placeholders(chunk.len())
                ),
                params_from_iter(bind_values),
            )?;
        }
        tx.commit()?;

        info!(
            "event=mark_failed module=repo status=ok requested={} failed={} released={} late={}",
            event_ids.len(),
            outcome.failed,
            outcome.released,
            outcome.late
        );
        Ok(outcome)
    }
}

fn select_claimable_ids(
    tx: &Transaction<'_>,
    now: &str,
    expiry_boundary: &str,
    limit: u32,
) -> RepoResult<Vec<EventId>> {
    let mut stmt = tx.prepare(
        "SELECT e.id
         FROM reminder_events e
         INNER JOIN reminders r ON r.id = e.reminder_id
         WHERE e.sent_at IS NULL
           AND e.trigger_at <= ?1
           AND r.status = 'PENDING'
           AND (e.claimed_at IS NULL OR e.claimed_at < ?2)
         ORDER BY e.trigger_at ASC, e.id ASC
         LIMIT ?3;",
    )?;
    let mut rows = stmt.query(params![now, expiry_boundary, i64::from(limit)])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

fn lease_candidates(
    tx: &Transaction<'_>,
    candidates: &[EventId],
    now: &str,
    expiry_boundary: &str,
    claim_token: &str,
) -> RepoResult<usize> {
    let mut changed = 0;
    for chunk in candidates.chunks(MAX_IDS_PER_STATEMENT) {
        let mut bind_values = vec![
            Value::Text(now.to_string()),
            Value::Text(claim_token.to_string()),
            Value::Text(expiry_boundary.to_string()),
        ];
        bind_values.extend(id_values(chunk));

        changed += tx.execute(
            &format!(
                "UPDATE reminder_events
                 SET
                    claimed_at = ?,
                    claim_token = ?
                 WHERE sent_at IS NULL
                   AND (claimed_at IS NULL OR claimed_at < ?)
                   AND id IN ({});",
                placeholders(chunk.len())
            ),
            params_from_iter(bind_values),
        )?;
    }
    Ok(changed)
}

/// Leases `candidates` under `claim_token` and loads what was actually won.
///
/// Returns an empty batch when every candidate was taken by someone else.
fn lease_and_load(
    tx: &Transaction<'_>,
    candidates: &[EventId],
    now: &str,
    expiry_boundary: &str,
    claim_token: &str,
) -> RepoResult<ClaimBatch> {
    if lease_candidates(tx, candidates, now, expiry_boundary, claim_token)? == 0 {
        return Ok(ClaimBatch::empty());
    }
    Ok(ClaimBatch {
        claim_token: claim_token.to_string(),
        events: load_claimed_events(tx, claim_token)?,
    })
}

/// Leases claimed before the returned instant have lapsed.
fn lease_expiry_boundary(now: DateTime<Utc>, claim_timeout_minutes: i64) -> RepoResult<String> {
    if !(1..=MAX_CLAIM_TIMEOUT_MINUTES).contains(&claim_timeout_minutes) {
        return Err(ValidationError::new(
            "claimTimeoutMinutes",
            format!(
                "must be between 1 and {MAX_CLAIM_TIMEOUT_MINUTES}, got {claim_timeout_minutes}"
            ),
        )
        .into());
    }
    Duration::try_minutes(claim_timeout_minutes)
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .map(format_timestamp)
        .ok_or_else(|| {
            ValidationError::new("claimTimeoutMinutes", "lease boundary is out of range").into()
        })
}

fn load_claimed_events(tx: &Transaction<'_>, claim_token: &str) -> RepoResult<Vec<ClaimedEvent>> {
    let mut stmt = tx.prepare(
        "SELECT
            e.id,
            e.reminder_id,
            r.title,
            r.description,
            e.trigger_at,
            r.timezone,
            e.claim_token
         FROM reminder_events e
         INNER JOIN reminders r ON r.id = e.reminder_id
         WHERE e.claim_token = ?1
         ORDER BY e.trigger_at ASC, e.id ASC;",
    )?;
    let mut rows = stmt.query([claim_token])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        let trigger_text: String = row.get(4)?;
        events.push(ClaimedEvent {
            event_id: row.get(0)?,
            reminder_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            trigger_at: parse_stored_timestamp(&trigger_text, "reminder_events.trigger_at")?,
            timezone: row.get(5)?,
            claim_token: row.get(6)?,
        });
    }
    Ok(events)
}

fn load_leased_state(
    tx: &Transaction<'_>,
    claim_token: &str,
    event_ids: &[EventId],
) -> RepoResult<Vec<(u32, Option<String>)>> {
    let mut bind_values = vec![Value::Text(claim_token.to_string())];
    bind_values.extend(id_values(event_ids));

    let mut stmt = tx.prepare(&format!(
        "SELECT attempts, claimed_at
         FROM reminder_events
         WHERE claim_token = ?
           AND id IN ({});",
        placeholders(event_ids.len())
    ))?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut state = Vec::new();
    while let Some(row) = rows.next()? {
        state.push((parse_attempts(row.get(0)?)?, row.get(1)?));
    }
    Ok(state)
}

fn parse_reminder_row(row: &Row<'_>) -> RepoResult<Reminder> {
    let status_text: String = row.get("status")?;
    let status = ReminderStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in reminders.status"
        ))
    })?;
    let trigger_text: String = row.get("trigger_at")?;
    let created_text: String = row.get("created_at")?;

    Ok(Reminder {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        trigger_at: parse_stored_timestamp(&trigger_text, "reminders.trigger_at")?,
        timezone: row.get("timezone")?,
        created_at: parse_stored_timestamp(&created_text, "reminders.created_at")?,
        status,
        metadata: row.get("metadata_json")?,
    })
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<ReminderEvent> {
    let trigger_text: String = row.get("trigger_at")?;
    let claimed_text: Option<String> = row.get("claimed_at")?;
    let sent_text: Option<String> = row.get("sent_at")?;

    Ok(ReminderEvent {
        id: row.get("id")?,
        reminder_id: row.get("reminder_id")?,
        trigger_at: parse_stored_timestamp(&trigger_text, "reminder_events.trigger_at")?,
        claimed_at: claimed_text
            .map(|value| parse_stored_timestamp(&value, "reminder_events.claimed_at"))
            .transpose()?,
        claim_token: row.get("claim_token")?,
        sent_at: sent_text
            .map(|value| parse_stored_timestamp(&value, "reminder_events.sent_at"))
            .transpose()?,
        attempts: parse_attempts(row.get("attempts")?)?,
        last_error: row.get("last_error")?,
    })
}

fn parse_stored_timestamp(value: &str, column: &str) -> RepoResult<DateTime<Utc>> {
    parse_timestamp(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid timestamp `{value}` in {column}")))
}

fn parse_attempts(value: i64) -> RepoResult<u32> {
    u32::try_from(value).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid attempts value `{value}` in reminder_events.attempts"
        ))
    })
}

fn id_values(ids: &[ReminderId]) -> impl Iterator<Item = Value> + '_ {
    ids.iter().map(|id| Value::Text(id.clone()))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::{
        lease_and_load, lease_candidates, select_claimable_ids, ReminderRepository,
        SqliteReminderRepository,
    };
    use crate::db::open_db_in_memory;
    use crate::model::reminder::{Reminder, ReminderEvent};
    use crate::model::timestamp::parse_timestamp;

    const NOW: &str = "2024-01-01T12:00:00.000Z";
    const EXPIRY_BOUNDARY: &str = "2024-01-01T11:55:00.000Z";
    const RIVAL_CLAIM_SQL: &str = "UPDATE reminder_events
         SET claimed_at = ?1, claim_token = 'rival'
         WHERE id = ?2;";

    fn seed(repo: &SqliteReminderRepository<'_>, reminder_id: &str, event_id: &str) {
        let at = parse_timestamp("2024-01-01T11:00:00Z").expect("valid timestamp");
        let reminder = Reminder::new(reminder_id, "due", at, at);
        let event = ReminderEvent::for_reminder(event_id, &reminder);
        repo.create_reminder(&reminder, &event)
            .expect("seed reminder");
    }

    #[test]
    fn lease_skips_rows_claimed_after_selection() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteReminderRepository::try_new(&conn).expect("repo");
        seed(&repo, "r-1", "e-1");
        seed(&repo, "r-2", "e-2");

        let tx = repo.begin().expect("begin");
        let candidates =
            select_claimable_ids(&tx, NOW, EXPIRY_BOUNDARY, 10).expect("select candidates");
        assert_eq!(candidates, vec!["e-1".to_string(), "e-2".to_string()]);

        tx.execute(RIVAL_CLAIM_SQL, ["2024-01-01T11:59:00.000Z", "e-1"])
            .expect("competing claim");

        let leased = lease_candidates(&tx, &candidates, NOW, EXPIRY_BOUNDARY, "mine")
            .expect("lease candidates");
        assert_eq!(leased, 1);

        let owner_of = |id: &str| -> String {
            tx.query_row(
                "SELECT claim_token FROM reminder_events WHERE id = ?1;",
                [id],
                |row| row.get(0),
            )
            .expect("claim token")
        };
        assert_eq!(owner_of("e-1"), "rival");
        assert_eq!(owner_of("e-2"), "mine");
    }

    #[test]
    fn lease_takes_over_rows_whose_claim_lapsed() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteReminderRepository::try_new(&conn).expect("repo");
        seed(&repo, "r-1", "e-1");

        let tx = repo.begin().expect("begin");
        tx.execute(RIVAL_CLAIM_SQL, ["2024-01-01T11:54:59.999Z", "e-1"])
            .expect("stale claim");

        let candidates = vec!["e-1".to_string()];
        let leased = lease_candidates(&tx, &candidates, NOW, EXPIRY_BOUNDARY, "mine")
            .expect("lease candidates");
        assert_eq!(leased, 1);
    }

    #[test]
    fn fully_contested_candidates_yield_empty_batch() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteReminderRepository::try_new(&conn).expect("repo");
        seed(&repo, "r-1", "e-1");
        seed(&repo, "r-2", "e-2");

        let tx = repo.begin().expect("begin");
        let candidates =
            select_claimable_ids(&tx, NOW, EXPIRY_BOUNDARY, 10).expect("select candidates");
        for id in &candidates {
            tx.execute(RIVAL_CLAIM_SQL, [NOW, id.as_str()])
                .expect("competing claim");
        }

        assert_eq!(
            lease_candidates(&tx, &candidates, NOW, EXPIRY_BOUNDARY, "mine")
                .expect("lease candidates"),
            0
        );

        let batch = lease_and_load(&tx, &candidates, NOW, EXPIRY_BOUNDARY, "mine")
            .expect("lease and load");
        assert!(batch.is_empty());
        assert_eq!(batch.claim_token, "");

        let rival_rows: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM reminder_events WHERE claim_token = 'rival';",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(rival_rows, 2);
    }
}
