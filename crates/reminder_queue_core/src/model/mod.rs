//! Domain model for scheduled reminders and their delivery events.
//!
//! # Responsibility
//! - Define the records persisted by the storage engine.
//! - Own the timestamp codec shared by storage and service layers.
//!
//! # Invariants
//! - Every reminder owns exactly one event created alongside it.
//! - All instants are UTC; display timezones never affect triggering.

pub mod reminder;
pub mod timestamp;
