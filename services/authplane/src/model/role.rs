//! Role and permission definitions.
//!
//! # Purpose
//! Roles bundle permissions; permissions are tenant-agnostic
//! `(resource, action)` definitions whose grant is scoped by the role.
use serde::{Deserialize, Serialize};
use tenantry_authz::RoleScope;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct Role {
    pub role_id: String,
    pub name: String,
    pub description: String,
    pub scope: RoleScope,
}

impl Role {
    pub fn new(name: &str, description: &str, scope: RoleScope) -> Self {
        Self {
            role_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            scope,
        }
    }

    pub fn is_system(&self) -> bool {
        self.scope.is_system()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct Permission {
    pub permission_id: String,
    /// Unique name; the default catalog uses `{resource}:{action}`.
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: String,
}

impl Permission {
    pub fn new(resource: &str, action: &str, description: &str) -> Self {
        Self {
            permission_id: uuid::Uuid::new_v4().to_string(),
            name: format!("{resource}:{action}"),
            resource: resource.to_string(),
            action: action.to_string(),
            description: description.to_string(),
        }
    }
}
