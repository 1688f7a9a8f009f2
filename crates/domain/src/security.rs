use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use stampgate_core::AppError;

/// Permissions enforced by authorization checks.
///
/// Identifiers use the `resource:action` form. [`Permission::AdminAll`] is the
/// super-permission; see [`grants`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Permission {
    /// Allows uploading documents.
    DocumentUpload,
    /// Allows reading documents.
    DocumentRead,
    /// Allows updating documents.
    DocumentUpdate,
    /// Allows deleting documents.
    DocumentDelete,
    /// Allows downloading documents.
    DocumentDownload,
    /// Allows creating projects.
    ProjectCreate,
    /// Allows reading projects.
    ProjectRead,
    /// Allows updating projects.
    ProjectUpdate,
    /// Allows deleting projects.
    ProjectDelete,
    /// Allows managing project membership.
    ProjectManage,
    /// Allows creating users.
    UserCreate,
    /// Allows reading users.
    UserRead,
    /// Allows updating users.
    UserUpdate,
    /// Allows deleting users.
    UserDelete,
    /// Allows inviting users.
    UserInvite,
    /// Allows managing users and their direct grants.
    UserManage,
    /// Allows creating roles.
    RoleCreate,
    /// Allows reading roles.
    RoleRead,
    /// Allows updating roles.
    RoleUpdate,
    /// Allows deleting roles.
    RoleDelete,
    /// Allows managing roles.
    RoleManage,
    /// Allows assigning roles to users.
    RoleAssign,
    /// Allows creating owner companies.
    CompanyCreate,
    /// Allows reading owner companies.
    CompanyRead,
    /// Allows updating owner companies.
    CompanyUpdate,
    /// Allows deleting owner companies.
    CompanyDelete,
    /// Allows managing owner companies.
    CompanyManage,
    /// Satisfies every permission check in the scope it is held.
    AdminAll,
    /// Allows changing system settings.
    SystemSettings,
}

impl Permission {
    /// Returns the stable `resource:action` identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentUpload => "document:upload",
            Self::DocumentRead => "document:read",
            Self::DocumentUpdate => "document:update",
            Self::DocumentDelete => "document:delete",
            Self::DocumentDownload => "document:download",
            Self::ProjectCreate => "project:create",
            Self::ProjectRead => "project:read",
            Self::ProjectUpdate => "project:update",
            Self::ProjectDelete => "project:delete",
            Self::ProjectManage => "project:manage",
            Self::UserCreate => "user:create",
            Self::UserRead => "user:read",
            Self::UserUpdate => "user:update",
            Self::UserDelete => "user:delete",
            Self::UserInvite => "user:invite",
            Self::UserManage => "user:manage",
            Self::RoleCreate => "role:create",
            Self::RoleRead => "role:read",
            Self::RoleUpdate => "role:update",
            Self::RoleDelete => "role:delete",
            Self::RoleManage => "role:manage",
            Self::RoleAssign => "role:assign",
            Self::CompanyCreate => "company:create",
            Self::CompanyRead => "company:read",
            Self::CompanyUpdate => "company:update",
            Self::CompanyDelete => "company:delete",
            Self::CompanyManage => "company:manage",
            Self::AdminAll => "admin:all",
            Self::SystemSettings => "system:settings",
        }
    }

    /// Returns the resource half of the identifier.
    #[must_use]
    pub fn resource(&self) -> &'static str {
        self.as_str()
            .split_once(':')
            .map(|(resource, _)| resource)
            .unwrap_or_default()
    }

    /// Returns the action half of the identifier.
    #[must_use]
    pub fn action(&self) -> &'static str {
        self.as_str()
            .split_once(':')
            .map(|(_, action)| action)
            .unwrap_or_default()
    }

    /// Returns all known permissions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Permission] = &[
            Permission::DocumentUpload,
            Permission::DocumentRead,
            Permission::DocumentUpdate,
            Permission::DocumentDelete,
            Permission::DocumentDownload,
            Permission::ProjectCreate,
            Permission::ProjectRead,
            Permission::ProjectUpdate,
            Permission::ProjectDelete,
            Permission::ProjectManage,
            Permission::UserCreate,
            Permission::UserRead,
            Permission::UserUpdate,
            Permission::UserDelete,
            Permission::UserInvite,
            Permission::UserManage,
            Permission::RoleCreate,
            Permission::RoleRead,
            Permission::RoleUpdate,
            Permission::RoleDelete,
            Permission::RoleManage,
            Permission::RoleAssign,
            Permission::CompanyCreate,
            Permission::CompanyRead,
            Permission::CompanyUpdate,
            Permission::CompanyDelete,
            Permission::CompanyManage,
            Permission::AdminAll,
            Permission::SystemSettings,
        ];

        ALL
    }

    /// Parses a transport value into a permission.
    pub fn from_transport(value: &str) -> Result<Self, AppError> {
        Self::from_str(value.trim())
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|permission| permission.as_str() == value)
            .copied()
            .ok_or_else(|| AppError::Validation(format!("unknown permission value '{value}'")))
    }
}

impl TryFrom<String> for Permission {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl From<Permission> for &'static str {
    fn from(value: Permission) -> Self {
        value.as_str()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Decides whether an effective permission set satisfies one permission.
///
/// Holding [`Permission::AdminAll`] satisfies every check. This is the only
/// place the super-permission short-circuit is expressed.
#[must_use]
pub fn grants(effective: &BTreeSet<Permission>, permission: Permission) -> bool {
    effective.contains(&Permission::AdminAll) || effective.contains(&permission)
}
