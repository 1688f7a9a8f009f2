//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_assignment_store;
mod postgres_assignment_store;

pub use in_memory_assignment_store::InMemoryAssignmentStore;
pub use postgres_assignment_store::PostgresAssignmentStore;
