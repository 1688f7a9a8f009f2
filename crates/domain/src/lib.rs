//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod catalog;
mod requirement;
mod security;

pub use catalog::{PermissionCatalog, RoleTemplate};
pub use requirement::{MatchMode, PermissionRequirement};
pub use security::{Permission, grants};
