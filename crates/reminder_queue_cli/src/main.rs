//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open (and migrate) a queue database file given as the first argument.
//! - Print schema version and per-status reminder counts.

use reminder_queue_core::db::migrations::current_version;
use reminder_queue_core::db::open_db;
use reminder_queue_core::{
    core_version, ReminderListQuery, ReminderRepository, ReminderStatus, SqliteReminderRepository,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("reminder_queue version={}", core_version());

    let Some(path) = std::env::args().nth(1) else {
        return ExitCode::SUCCESS;
    };

    match report(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("reminder_queue error={err}");
            ExitCode::FAILURE
        }
    }
}

fn report(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_db(path)?;
    println!("reminder_queue schema_version={}", current_version(&conn)?);

    let repo = SqliteReminderRepository::try_new(&conn)?;
    for status in ReminderStatus::ALL {
        let query = ReminderListQuery {
            status: Some(status),
            ..ReminderListQuery::default()
        };
        let count = repo.list_reminders(&query)?.len();
        println!("reminder_queue status={status} count={count}");
    }
    Ok(())
}
