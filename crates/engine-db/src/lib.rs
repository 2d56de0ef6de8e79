//! Postgres-backed persistence for runs, tasks, and cost events.
//!
//! This crate owns the schema and the repository functions that the
//! orchestration layer (`engine-core`) calls into. It does not know about
//! state machines, scheduling, or budgets -- it only knows how to read and
//! write rows, using status-gated `UPDATE` statements for optimistic locking.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
