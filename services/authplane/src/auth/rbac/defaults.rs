//! Built-in permission catalog and role templates.
//!
//! # Purpose
//! Seeds the system permission catalog and system roles at startup, and instantiates the
//! standard role set for a tenant on request. Both operations check by name before
//! inserting, so they can be repeated (and raced by concurrent boots) safely.
use crate::auth::rbac::engine::EngineResult;
use crate::auth::rbac::sync::Synchronizer;
use crate::model::{Permission, Role};
use crate::store::{DirectoryStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_authz::{RoleScope, TenantId};
use utoipa::ToSchema;

/// `(resource, action, description)` for every built-in permission.
pub const PERMISSION_CATALOG: &[(&str, &str, &str)] = &[
    ("profile", "read", "Read own profile"),
    ("users", "read", "List users and their permissions"),
    ("users", "manage", "Assign and revoke user roles"),
    ("roles", "read", "List roles"),
    ("roles", "manage", "Create, delete and edit roles"),
    ("settings", "read", "Read tenant settings and domains"),
    ("settings", "manage", "Edit tenant settings and domains"),
    ("audit", "read", "Read the audit log"),
    ("tenants", "read", "Read tenant records"),
    ("tenants", "manage", "Provision and edit tenants"),
];

const SUPPORT_PERMISSIONS: &[&str] = &[
    "profile:read",
    "users:read",
    "roles:read",
    "settings:read",
    "audit:read",
    "tenants:read",
];

pub const PLATFORM_ADMIN_ROLE: &str = "platform-admin";
pub const SUPPORT_ROLE: &str = "support";

struct RoleTemplate {
    name: &'static str,
    description: &'static str,
    permissions: &'static [&'static str],
}

const TENANT_TEMPLATES: &[RoleTemplate] = &[
    RoleTemplate {
        name: "admin",
        description: "Full control of the tenant",
        permissions: &[
            "profile:read",
            "users:read",
            "users:manage",
            "roles:read",
            "roles:manage",
            "settings:read",
            "settings:manage",
            "audit:read",
        ],
    },
    RoleTemplate {
        name: "manager",
        description: "Manages users",
        permissions: &[
            "profile:read",
            "users:read",
            "users:manage",
            "roles:read",
            "settings:read",
        ],
    },
    RoleTemplate {
        name: "user",
        description: "Regular member",
        permissions: &["profile:read", "users:read"],
    },
    RoleTemplate {
        name: "viewer",
        description: "Read-only member",
        permissions: &["profile:read"],
    },
];

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SeededRole {
    pub role_id: String,
    pub name: String,
    pub permissions: usize,
}

pub struct RoleDefaults {
    directory: Arc<dyn DirectoryStore>,
    synchronizer: Synchronizer,
}

impl RoleDefaults {
    pub fn new(directory: Arc<dyn DirectoryStore>, synchronizer: Synchronizer) -> Self {
        Self {
            directory,
            synchronizer,
        }
    }

    /// Create the permission catalog and the system roles if they are missing.
    pub async fn ensure_system_defaults(&self) -> EngineResult<Vec<SeededRole>> {
        let catalog = self.ensure_catalog().await?;
        let all: Vec<&str> = catalog.keys().map(String::as_str).collect();
        let mut seeded = Vec::new();
        seeded.push(
            self.ensure_role(
                &RoleScope::System,
                PLATFORM_ADMIN_ROLE,
                "Operates the platform",
                &all,
                &catalog,
            )
            .await?,
        );
        seeded.push(
            self.ensure_role(
                &RoleScope::System,
                SUPPORT_ROLE,
                "Read-only platform support",
                SUPPORT_PERMISSIONS,
                &catalog,
            )
            .await?,
        );
        tracing::info!(roles = seeded.len(), "system defaults ensured");
        Ok(seeded)
    }

    /// Instantiate the standard role set for `tenant`.
    ///
    /// # Errors
    /// Fails with a store `NotFound` when the tenant does not exist.
    pub async fn create_default_tenant_roles(
        &self,
        tenant: &TenantId,
    ) -> EngineResult<Vec<SeededRole>> {
        if !self.directory.tenant_exists(tenant.as_str()).await? {
            return Err(StoreError::NotFound("tenant".into()).into());
        }
        let catalog = self.ensure_catalog().await?;
        let scope = RoleScope::tenant(tenant.clone());
        let mut seeded = Vec::with_capacity(TENANT_TEMPLATES.len());
        for template in TENANT_TEMPLATES {
            seeded.push(
                self.ensure_role(
                    &scope,
                    template.name,
                    template.description,
                    template.permissions,
                    &catalog,
                )
                .await?,
            );
        }
        tracing::info!(tenant = %tenant, roles = seeded.len(), "default tenant roles ensured");
        Ok(seeded)
    }

    async fn ensure_catalog(&self) -> EngineResult<HashMap<String, Permission>> {
        let mut catalog = HashMap::with_capacity(PERMISSION_CATALOG.len());
        for (resource, action, description) in PERMISSION_CATALOG {
            let permission = Permission::new(resource, action, description);
            let permission = match self.directory.find_permission_by_name(&permission.name).await? {
                Some(existing) => existing,
                None => match self.directory.create_permission(permission.clone()).await {
                    Ok(created) => created,
                    Err(StoreError::Conflict(_)) => self
                        .directory
                        .find_permission_by_name(&permission.name)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(permission.name.clone()))?,
                    Err(err) => return Err(err.into()),
                },
            };
            catalog.insert(permission.name.clone(), permission);
        }
        Ok(catalog)
    }

    async fn ensure_role(
        &self,
        scope: &RoleScope,
        name: &str,
        description: &str,
        permissions: &[&str],
        catalog: &HashMap<String, Permission>,
    ) -> EngineResult<SeededRole> {
        let role = match self.directory.find_role_by_name(scope, name).await? {
            Some(existing) => existing,
            None => match self
                .directory
                .create_role(Role::new(name, description, scope.clone()))
                .await
            {
                Ok(created) => created,
                Err(StoreError::Conflict(_)) => self
                    .directory
                    .find_role_by_name(scope, name)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?,
                Err(err) => return Err(err.into()),
            },
        };
        for key in permissions {
            let permission = catalog
                .get(*key)
                .ok_or_else(|| StoreError::NotFound((*key).to_string()))?;
            self.directory
                .attach_permission(&role.role_id, &permission.permission_id)
                .await?;
        }
        let count = self
            .synchronizer
            .sync_role_permissions(&role.role_id)
            .await?;
        Ok(SeededRole {
            role_id: role.role_id,
            name: role.name,
            permissions: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rbac::engine::{AuthorizationEngine, EngineError};
    use crate::model::{Tenant, TenantStatus, UserRole};
    use crate::store::memory::InMemoryStore;

    async fn defaults() -> (RoleDefaults, Arc<InMemoryStore>, Arc<AuthorizationEngine>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_tenant(Tenant {
                tenant_id: "t1".to_string(),
                display_name: "T1".to_string(),
                status: TenantStatus::Active,
            })
            .await
            .expect("tenant");
        let engine = Arc::new(AuthorizationEngine::new(store.clone()).await.expect("engine"));
        let sync = Synchronizer::new(store.clone(), engine.clone());
        (RoleDefaults::new(store.clone(), sync), store, engine)
    }

    #[tokio::test]
    async fn system_defaults_are_idempotent() {
        let (defaults, store, engine) = defaults().await;
        let first = defaults.ensure_system_defaults().await.expect("seed");
        let second = defaults.ensure_system_defaults().await.expect("seed again");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].role_id, second[0].role_id);
        assert_eq!(first[0].permissions, PERMISSION_CATALOG.len());
        assert_eq!(first[1].permissions, SUPPORT_PERMISSIONS.len());
        assert_eq!(store.list_all_roles().await.expect("roles").len(), 2);
        assert_eq!(
            store.list_permissions().await.expect("permissions").len(),
            PERMISSION_CATALOG.len()
        );
        assert_eq!(
            engine.sizes().await.0,
            PERMISSION_CATALOG.len() + SUPPORT_PERMISSIONS.len()
        );
    }

    #[tokio::test]
    async fn tenant_roles_grant_their_bundles() {
        let (defaults, store, engine) = defaults().await;
        let t1 = TenantId::new("t1");
        let roles = defaults.create_default_tenant_roles(&t1).await.expect("roles");
        let again = defaults.create_default_tenant_roles(&t1).await.expect("roles");
        assert_eq!(
            roles.iter().map(|r| &r.role_id).collect::<Vec<_>>(),
            again.iter().map(|r| &r.role_id).collect::<Vec<_>>()
        );

        let viewer = roles.iter().find(|r| r.name == "viewer").expect("viewer");
        store
            .upsert_user_role(UserRole::active("vic", &viewer.role_id, "t1"))
            .await
            .expect("assign");
        engine
            .assign_role("vic", &viewer.role_id, &t1)
            .await
            .expect("grouping");
        assert!(engine.enforce("vic", "profile", "read", &t1).await);
        assert!(!engine.enforce("vic", "users", "manage", &t1).await);
    }

    #[tokio::test]
    async fn unknown_tenant_is_rejected() {
        let (defaults, _, _) = defaults().await;
        let err = defaults
            .create_default_tenant_roles(&TenantId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound(_))));
    }
}
