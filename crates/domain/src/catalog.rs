use std::collections::HashSet;
use std::str::FromStr;

use stampgate_core::{AppError, AppResult, NonEmptyString};

use crate::Permission;

/// Role bundle materialized into storage by the seeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTemplate {
    name: NonEmptyString,
    description: String,
    permissions: Vec<Permission>,
}

impl RoleTemplate {
    /// Creates a template from already-typed permissions.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        permissions: Vec<Permission>,
    ) -> AppResult<Self> {
        let mut seen = HashSet::new();
        let permissions = permissions
            .into_iter()
            .filter(|permission| seen.insert(*permission))
            .collect();

        Ok(Self {
            name: NonEmptyString::new(name)?,
            description: description.into(),
            permissions,
        })
    }

    /// Creates a template from permission identifiers.
    ///
    /// Unknown identifiers fail here, at load time, rather than silently
    /// never matching at check time.
    pub fn from_identifiers(
        name: impl Into<String>,
        description: impl Into<String>,
        identifiers: &[&str],
    ) -> AppResult<Self> {
        let permissions = identifiers
            .iter()
            .map(|identifier| Permission::from_str(identifier))
            .collect::<AppResult<Vec<_>>>()?;

        Self::new(name, description, permissions)
    }

    /// Returns the role name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Returns the bundled permissions.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        self.permissions.as_slice()
    }
}

/// Immutable registry of permissions, role hierarchy and default roles.
///
/// Built once at startup and shared by reference; nothing in the catalog
/// changes after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCatalog {
    hierarchy: Vec<String>,
    roles: Vec<RoleTemplate>,
}

impl PermissionCatalog {
    /// Creates a catalog from an ordered hierarchy (highest authority first)
    /// and the default role bundles.
    pub fn new(hierarchy: Vec<String>, roles: Vec<RoleTemplate>) -> AppResult<Self> {
        if hierarchy.is_empty() {
            return Err(AppError::Validation(
                "role hierarchy must list at least one role".to_owned(),
            ));
        }

        let mut hierarchy_names = HashSet::new();
        for name in &hierarchy {
            if name.trim().is_empty() {
                return Err(AppError::Validation(
                    "role hierarchy entries must not be empty".to_owned(),
                ));
            }
            if !hierarchy_names.insert(name.as_str()) {
                return Err(AppError::Validation(format!(
                    "role '{name}' appears more than once in the hierarchy"
                )));
            }
        }

        let mut role_names = HashSet::new();
        for role in &roles {
            if !role_names.insert(role.name()) {
                return Err(AppError::Validation(format!(
                    "role '{}' is defined more than once",
                    role.name()
                )));
            }
        }

        Ok(Self { hierarchy, roles })
    }

    /// Returns the built-in catalog: `admin, manager, uploader, viewer`.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            hierarchy: ["admin", "manager", "uploader", "viewer"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            roles: standard_roles(),
        }
    }

    /// Returns every known permission.
    #[must_use]
    pub fn permissions(&self) -> &'static [Permission] {
        Permission::all()
    }

    /// Returns the role hierarchy, highest authority first.
    #[must_use]
    pub fn hierarchy(&self) -> &[String] {
        self.hierarchy.as_slice()
    }

    /// Returns the default role bundles.
    #[must_use]
    pub fn roles(&self) -> &[RoleTemplate] {
        self.roles.as_slice()
    }

    /// Returns the default bundle for a role name.
    #[must_use]
    pub fn role(&self, name: &str) -> Option<&RoleTemplate> {
        self.roles.iter().find(|role| role.name() == name)
    }

    /// Returns the role with the greatest authority.
    #[must_use]
    pub fn top_role(&self) -> Option<&str> {
        self.hierarchy.first().map(String::as_str)
    }

    /// Rank assigned to roles outside the hierarchy and to "no role".
    #[must_use]
    pub fn sentinel_rank(&self) -> usize {
        self.hierarchy.len()
    }

    /// Returns the zero-based hierarchy position of a role.
    ///
    /// Lower is more authority. Unknown names, empty names and `None` all map
    /// to [`Self::sentinel_rank`].
    #[must_use]
    pub fn rank(&self, role_name: Option<&str>) -> usize {
        role_name
            .filter(|name| !name.is_empty())
            .and_then(|name| self.hierarchy.iter().position(|entry| entry == name))
            .unwrap_or(self.sentinel_rank())
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn standard_roles() -> Vec<RoleTemplate> {
    use Permission::*;

    let templates: [(&str, &str, Vec<Permission>); 4] = [
        (
            "admin",
            "Full system administrator with all permissions",
            Permission::all().to_vec(),
        ),
        (
            "manager",
            "Project manager - can manage projects, invite users, and manage documents",
            vec![
                DocumentUpload,
                DocumentRead,
                DocumentUpdate,
                DocumentDownload,
                ProjectCreate,
                ProjectRead,
                ProjectUpdate,
                ProjectManage,
                UserRead,
                UserInvite,
                RoleRead,
                RoleAssign,
                CompanyCreate,
                CompanyRead,
            ],
        ),
        (
            "uploader",
            "Document uploader - can upload and view documents",
            vec![
                DocumentUpload,
                DocumentRead,
                DocumentDownload,
                ProjectRead,
                UserRead,
            ],
        ),
        (
            "viewer",
            "Read-only user - can view and download documents",
            vec![DocumentRead, DocumentDownload, ProjectRead, UserRead],
        ),
    ];

    templates
        .into_iter()
        .filter_map(|(name, description, permissions)| {
            RoleTemplate::new(name, description, permissions).ok()
        })
        .collect()
}
