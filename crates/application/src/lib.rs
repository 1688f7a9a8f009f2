//! Application services and ports.

#![forbid(unsafe_code)]

mod assignment_guard;
mod assignment_ports;
mod permission_resolver;
mod seeder;

#[cfg(test)]
mod test_support;

pub use assignment_guard::AssignmentGuard;
pub use assignment_ports::{
    AssignmentReader, AssignmentStore, AssignmentTransaction, DirectGrant, DirectPermissionSet,
    EnsuredRole, RoleAssignment, RoleDefinition,
};
pub use permission_resolver::{PermissionResolver, PermissionSummary, PermissionView, ScopeAccess};
pub use seeder::{SeedReport, Seeder};
