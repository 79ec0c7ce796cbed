//! Repository layer: atomic data access for the reminder queue.
//!
//! # Responsibility
//! - Define the queue's data access contract.
//! - Keep every SQL statement and transaction boundary inside core
//!   persistence.
//!
//! # Invariants
//! - Each mutating operation is exactly one transaction; dropping the guard
//!   on any early return rolls it back.
//! - Preconditions are re-checked inside the write statement itself, so
//!   concurrent pollers need no in-process lock.

pub mod reminder_repo;
