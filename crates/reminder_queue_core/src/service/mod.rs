//! Core use-case services.
//!
//! # Responsibility
//! - Validate and normalize externally shaped requests.
//! - Orchestrate repository calls and map results to response envelopes.
//!
//! # Invariants
//! - Services hold no SQL and no storage state of their own.

pub mod reminder_service;
