//! Persistence layer for hunt state
//!
//! This module provides:
//! - [`AssignmentStore`] trait, the single writer of puzzles, rounds and solvers
//! - [`InMemoryAssignmentStore`] for testing
//! - [`PostgresAssignmentStore`] for production, with [`PostgresConfigSource`]

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryAssignmentStore;
pub use postgres::{PostgresAssignmentStore, PostgresConfigSource};
pub use store::{
    AbandonmentPolicy, AssignOutcome, AssignmentStore, HuntSnapshot, NewActivity, StoreError,
};
