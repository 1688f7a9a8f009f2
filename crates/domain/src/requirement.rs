use serde::{Deserialize, Serialize};
use stampgate_core::{AppError, AppResult};

use crate::Permission;

/// How a requirement's permission list is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Satisfied by holding at least one listed permission.
    Any,
    /// Satisfied only by holding every listed permission.
    All,
}

/// Permissions a caller must hold before an action proceeds.
///
/// Deserialization goes through [`PermissionRequirement::new`], so an empty
/// permission list is rejected on every construction path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RequirementPayload")]
pub struct PermissionRequirement {
    permissions: Vec<Permission>,
    mode: MatchMode,
}

#[derive(Deserialize)]
struct RequirementPayload {
    permissions: Vec<Permission>,
    mode: MatchMode,
}

impl TryFrom<RequirementPayload> for PermissionRequirement {
    type Error = AppError;

    fn try_from(payload: RequirementPayload) -> Result<Self, Self::Error> {
        Self::new(payload.permissions, payload.mode)
    }
}

impl PermissionRequirement {
    /// Creates a requirement. The permission list must not be empty.
    pub fn new(permissions: Vec<Permission>, mode: MatchMode) -> AppResult<Self> {
        let mut unique = Vec::with_capacity(permissions.len());
        for permission in permissions {
            if !unique.contains(&permission) {
                unique.push(permission);
            }
        }

        if unique.is_empty() {
            return Err(AppError::Validation(
                "permission requirement must list at least one permission".to_owned(),
            ));
        }

        Ok(Self {
            permissions: unique,
            mode,
        })
    }

    /// Requires any one of the listed permissions.
    pub fn any(permissions: Vec<Permission>) -> AppResult<Self> {
        Self::new(permissions, MatchMode::Any)
    }

    /// Requires every listed permission.
    pub fn all(permissions: Vec<Permission>) -> AppResult<Self> {
        Self::new(permissions, MatchMode::All)
    }

    /// Requires exactly one permission.
    #[must_use]
    pub fn single(permission: Permission) -> Self {
        Self {
            permissions: vec![permission],
            mode: MatchMode::All,
        }
    }

    /// Returns the listed permissions in declaration order.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        self.permissions.as_slice()
    }

    /// Returns the match mode.
    #[must_use]
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Returns the listed permissions the predicate rejects.
    pub fn unmet(&self, mut is_held: impl FnMut(Permission) -> bool) -> Vec<Permission> {
        self.permissions
            .iter()
            .copied()
            .filter(|permission| !is_held(*permission))
            .collect()
    }

    /// Evaluates the requirement with a per-permission predicate.
    pub fn is_satisfied(&self, is_held: impl FnMut(Permission) -> bool) -> bool {
        let unmet = self.unmet(is_held);
        match self.mode {
            MatchMode::Any => unmet.len() < self.permissions.len(),
            MatchMode::All => unmet.is_empty(),
        }
    }
}
