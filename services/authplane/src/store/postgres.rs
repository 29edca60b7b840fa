//! Postgres-backed implementation of the directory and policy stores.
//!
//! # What this module is
//! Implements [`DirectoryStore`] and [`PolicyStore`] using Postgres (via `sqlx`) as the durable
//! source of truth for tenants, domains, roles, permissions, user-role assignments and the flat
//! Casbin tuple projection that seeds the in-memory enforcer.
//!
//! # Key invariants
//! - Domain strings are the primary key of `tenant_domains`, so they are unique platform-wide.
//! - Role names are unique per scope through partial unique indexes.
//! - Policy and grouping inserts use `ON CONFLICT DO NOTHING`; deletes of missing rows succeed.
//! - Replace operations run in a single transaction so readers never observe a half-applied set.
//!
//! # Security model / threat assumptions
//! - Database URLs may contain credentials; avoid logging them.
//! - All SQL is static; user input only flows through bind parameters.
//!
//! # Operational notes
//! - Migrations run at connect time via `sqlx::migrate!("./migrations")`.
//! - `acquire_timeout` and `connect_timeout` bound how long a request waits on the pool.
use super::{DirectoryStore, PolicyStore, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::model::{
    AssignmentStatus, Permission, Role, Tenant, TenantDomain, TenantStatus, UserRole,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tenantry_authz::{GroupingRule, PolicyRule, RoleScope};

/// Durable authplane store backed by Postgres.
///
/// # Errors
/// - Connection and query failures surface as [`StoreError::Unexpected`].
/// - Unique violations surface as [`StoreError::Conflict`].
///
/// # Example
/// ```rust,no_run
/// use authplane::config::PostgresConfig;
/// use authplane::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbTenant {
    tenant_id: String,
    display_name: String,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbDomain {
    domain: String,
    tenant_id: String,
    is_custom: bool,
    verified: bool,
    ssl_enabled: bool,
    verification_token: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    role_id: String,
    name: String,
    description: String,
    is_system: bool,
    tenant_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DbPermission {
    permission_id: String,
    name: String,
    resource: String,
    action: String,
    description: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbUserRole {
    user_id: String,
    role_id: String,
    tenant_id: String,
    status: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbPolicy {
    subject: String,
    domain: String,
    object: String,
    action: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbGrouping {
    user_subject: String,
    role_subject: String,
    domain: String,
}

const DOMAIN_COLUMNS: &str = "domain, tenant_id, is_custom, verified, ssl_enabled, \
     verification_token, verified_at, expires_at";
const ROLE_COLUMNS: &str = "role_id, name, description, is_system, tenant_id";
const PERMISSION_COLUMNS: &str = "permission_id, name, resource, action, description";

impl PostgresStore {
    /// Connect to Postgres and apply embedded migrations.
    ///
    /// # Errors
    /// - Invalid URL, connection, or migration failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        // Avoid logging `pg.url`; it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), pool)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;

        // Handlers assume the schema exists, so a migration failure fails startup.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23503").unwrap_or(false);
    }
    false
}

/// Map an insert failure onto the store taxonomy.
fn insert_error(err: sqlx::Error, conflict: &str, missing: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(conflict.into())
    } else if is_foreign_key_violation(&err) {
        StoreError::NotFound(missing.into())
    } else {
        StoreError::Unexpected(err.into())
    }
}

fn tenant_from_db(row: DbTenant) -> StoreResult<Tenant> {
    let status = TenantStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid tenant status {}", row.status)))?;
    Ok(Tenant {
        tenant_id: row.tenant_id,
        display_name: row.display_name,
        status,
    })
}

fn domain_from_db(row: DbDomain) -> TenantDomain {
    TenantDomain {
        domain: row.domain,
        tenant_id: row.tenant_id,
        is_custom: row.is_custom,
        verified: row.verified,
        ssl_enabled: row.ssl_enabled,
        verification_token: row.verification_token,
        verified_at: row.verified_at,
        expires_at: row.expires_at,
    }
}

fn role_from_db(row: DbRole) -> StoreResult<Role> {
    let scope = RoleScope::from_columns(row.tenant_id, row.is_system)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("role {} has no valid scope", row.role_id)))?;
    Ok(Role {
        role_id: row.role_id,
        name: row.name,
        description: row.description,
        scope,
    })
}

fn permission_from_db(row: DbPermission) -> Permission {
    Permission {
        permission_id: row.permission_id,
        name: row.name,
        resource: row.resource,
        action: row.action,
        description: row.description,
    }
}

fn user_role_from_db(row: DbUserRole) -> StoreResult<UserRole> {
    let status = AssignmentStatus::parse(&row.status).ok_or_else(|| {
        StoreError::Unexpected(anyhow!("invalid assignment status {}", row.status))
    })?;
    Ok(UserRole {
        user_id: row.user_id,
        role_id: row.role_id,
        tenant_id: row.tenant_id,
        status,
    })
}

fn policy_from_db(row: DbPolicy) -> PolicyRule {
    PolicyRule {
        subject: row.subject,
        domain: row.domain,
        object: row.object,
        action: row.action,
    }
}

fn grouping_from_db(row: DbGrouping) -> GroupingRule {
    GroupingRule {
        user: row.user_subject,
        role: row.role_subject,
        domain: row.domain,
    }
}

async fn insert_policy<'e, E>(executor: E, rule: &PolicyRule) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO rbac_policies (subject, domain, object, action) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT DO NOTHING",
    )
    .bind(&rule.subject)
    .bind(&rule.domain)
    .bind(&rule.object)
    .bind(&rule.action)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_grouping<'e, E>(executor: E, rule: &GroupingRule) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO rbac_groupings (user_subject, role_subject, domain) \
         VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(&rule.user)
    .bind(&rule.role)
    .bind(&rule.domain)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl DirectoryStore for PostgresStore {
    async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
        sqlx::query("INSERT INTO tenants (tenant_id, display_name, status) VALUES ($1, $2, $3)")
            .bind(&tenant.tenant_id)
            .bind(&tenant.display_name)
            .bind(tenant.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|err| insert_error(err, "tenant exists", "tenant"))?;
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Tenant> {
        let row: Option<DbTenant> = sqlx::query_as(
            "SELECT tenant_id, display_name, status FROM tenants WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => tenant_from_db(row),
            None => Err(StoreError::NotFound("tenant".into())),
        }
    }

    async fn tenant_exists(&self, tenant_id: &str) -> StoreResult<bool> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tenants WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn add_domain(&self, domain: TenantDomain) -> StoreResult<TenantDomain> {
        sqlx::query(&format!(
            "INSERT INTO tenant_domains ({DOMAIN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(&domain.domain)
        .bind(&domain.tenant_id)
        .bind(domain.is_custom)
        .bind(domain.verified)
        .bind(domain.ssl_enabled)
        .bind(&domain.verification_token)
        .bind(domain.verified_at)
        .bind(domain.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "domain exists", "tenant"))?;
        Ok(domain)
    }

    async fn find_domain(&self, domain: &str) -> StoreResult<Option<TenantDomain>> {
        let row: Option<DbDomain> = sqlx::query_as(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM tenant_domains WHERE domain = $1"
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(domain_from_db))
    }

    async fn list_domains(&self, tenant_id: &str) -> StoreResult<Vec<TenantDomain>> {
        let rows: Vec<DbDomain> = sqlx::query_as(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM tenant_domains WHERE tenant_id = $1 ORDER BY domain"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(domain_from_db).collect())
    }

    async fn mark_domain_verified(
        &self,
        domain: &str,
        verified_at: DateTime<Utc>,
    ) -> StoreResult<TenantDomain> {
        let row: Option<DbDomain> = sqlx::query_as(&format!(
            "UPDATE tenant_domains \
             SET verified = TRUE, verified_at = $2, verification_token = NULL, expires_at = NULL \
             WHERE domain = $1 RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(domain)
        .bind(verified_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(domain_from_db)
            .ok_or_else(|| StoreError::NotFound("domain".into()))
    }

    async fn delete_domain(&self, domain: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tenant_domains WHERE domain = $1")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("domain".into()));
        }
        Ok(())
    }

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        sqlx::query(&format!(
            "INSERT INTO roles ({ROLE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(&role.role_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.scope.is_system())
        .bind(role.scope.tenant_id().map(|tenant| tenant.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "role exists", "tenant"))?;
        Ok(role)
    }

    async fn get_role(&self, role_id: &str) -> StoreResult<Role> {
        let row: Option<DbRole> =
            sqlx::query_as(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role_id = $1"))
                .bind(role_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => role_from_db(row),
            None => Err(StoreError::NotFound("role".into())),
        }
    }

    async fn find_role_by_name(&self, scope: &RoleScope, name: &str) -> StoreResult<Option<Role>> {
        let row: Option<DbRole> = match scope.tenant_id() {
            None => {
                sqlx::query_as(&format!(
                    "SELECT {ROLE_COLUMNS} FROM roles WHERE is_system AND name = $1"
                ))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(tenant_id) => {
                sqlx::query_as(&format!(
                    "SELECT {ROLE_COLUMNS} FROM roles \
                     WHERE NOT is_system AND tenant_id = $1 AND name = $2"
                ))
                .bind(tenant_id.as_str())
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.map(role_from_db).transpose()
    }

    async fn list_roles(&self, tenant_id: &str) -> StoreResult<Vec<Role>> {
        let rows: Vec<DbRole> = sqlx::query_as(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE is_system OR tenant_id = $1 ORDER BY name"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(role_from_db).collect()
    }

    async fn list_all_roles(&self) -> StoreResult<Vec<Role>> {
        let rows: Vec<DbRole> = sqlx::query_as(&format!("SELECT {ROLE_COLUMNS} FROM roles"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(role_from_db).collect()
    }

    async fn delete_role(&self, role_id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let is_system: Option<bool> =
            sqlx::query_scalar("SELECT is_system FROM roles WHERE role_id = $1 FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        match is_system {
            None => return Err(StoreError::NotFound("role".into())),
            Some(true) => return Err(StoreError::Protected("system role".into())),
            Some(false) => {}
        }
        // role_permissions and user_roles cascade through their foreign keys.
        sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        sqlx::query(&format!(
            "INSERT INTO permissions ({PERMISSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(&permission.permission_id)
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "permission exists", "permission"))?;
        Ok(permission)
    }

    async fn get_permission(&self, permission_id: &str) -> StoreResult<Permission> {
        let row: Option<DbPermission> = sqlx::query_as(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE permission_id = $1"
        ))
        .bind(permission_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(permission_from_db)
            .ok_or_else(|| StoreError::NotFound("permission".into()))
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        let row: Option<DbPermission> = sqlx::query_as(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(permission_from_db))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows: Vec<DbPermission> = sqlx::query_as(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(permission_from_db).collect())
    }

    async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "permission attached", "role or permission"))?;
        Ok(())
    }

    async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id)
            .bind(permission_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>> {
        let rows: Vec<DbPermission> = sqlx::query_as(
            "SELECT p.permission_id, p.name, p.resource, p.action, p.description \
             FROM permissions p \
             JOIN role_permissions rp ON rp.permission_id = p.permission_id \
             WHERE rp.role_id = $1 ORDER BY p.name",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(permission_from_db).collect())
    }

    async fn upsert_user_role(&self, user_role: UserRole) -> StoreResult<UserRole> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id, tenant_id, status) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, role_id, tenant_id) DO UPDATE SET status = EXCLUDED.status",
        )
        .bind(&user_role.user_id)
        .bind(&user_role.role_id)
        .bind(&user_role.tenant_id)
        .bind(user_role.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| insert_error(err, "user role exists", "role or tenant"))?;
        Ok(user_role)
    }

    async fn set_user_role_status(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
        status: AssignmentStatus,
    ) -> StoreResult<UserRole> {
        let row: Option<DbUserRole> = sqlx::query_as(
            "UPDATE user_roles SET status = $4 \
             WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3 \
             RETURNING user_id, role_id, tenant_id, status",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => user_role_from_db(row),
            None => Err(StoreError::NotFound("user role".into())),
        }
    }

    async fn delete_user_role(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2 AND tenant_id = $3",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_roles(&self, user_id: &str) -> StoreResult<Vec<UserRole>> {
        let rows: Vec<DbUserRole> = sqlx::query_as(
            "SELECT user_id, role_id, tenant_id, status FROM user_roles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_role_from_db).collect()
    }

    async fn list_all_user_roles(&self) -> StoreResult<Vec<UserRole>> {
        let rows: Vec<DbUserRole> =
            sqlx::query_as("SELECT user_id, role_id, tenant_id, status FROM user_roles")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(user_role_from_db).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn load_policies(&self) -> StoreResult<Vec<PolicyRule>> {
        let rows: Vec<DbPolicy> =
            sqlx::query_as("SELECT subject, domain, object, action FROM rbac_policies")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(policy_from_db).collect())
    }

    async fn load_groupings(&self) -> StoreResult<Vec<GroupingRule>> {
        let rows: Vec<DbGrouping> =
            sqlx::query_as("SELECT user_subject, role_subject, domain FROM rbac_groupings")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(grouping_from_db).collect())
    }

    async fn add_policy(&self, rule: &PolicyRule) -> StoreResult<()> {
        insert_policy(&self.pool, rule).await?;
        Ok(())
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM rbac_policies \
             WHERE subject = $1 AND domain = $2 AND object = $3 AND action = $4",
        )
        .bind(&rule.subject)
        .bind(&rule.domain)
        .bind(&rule.object)
        .bind(&rule.action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_grouping(&self, rule: &GroupingRule) -> StoreResult<()> {
        insert_grouping(&self.pool, rule).await?;
        Ok(())
    }

    async fn remove_grouping(&self, rule: &GroupingRule) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM rbac_groupings \
             WHERE user_subject = $1 AND role_subject = $2 AND domain = $3",
        )
        .bind(&rule.user)
        .bind(&rule.role)
        .bind(&rule.domain)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_subject_policies(
        &self,
        subject: &str,
        rules: &[PolicyRule],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rbac_policies WHERE subject = $1")
            .bind(subject)
            .execute(&mut *tx)
            .await?;
        for rule in rules {
            insert_policy(&mut *tx, rule).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_user_groupings(&self, user: &str, rules: &[GroupingRule]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rbac_groupings WHERE user_subject = $1")
            .bind(user)
            .execute(&mut *tx)
            .await?;
        for rule in rules {
            insert_grouping(&mut *tx, rule).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_role_rules(&self, role: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rbac_policies WHERE subject = $1")
            .bind(role)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rbac_groupings WHERE role_subject = $1")
            .bind(role)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_all(
        &self,
        policies: &[PolicyRule],
        groupings: &[GroupingRule],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM rbac_policies")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rbac_groupings")
            .execute(&mut *tx)
            .await?;
        for rule in policies {
            insert_policy(&mut *tx, rule).await?;
        }
        for rule in groupings {
            insert_grouping(&mut *tx, rule).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_detection_ignores_non_db_errors() {
        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
        assert!(!is_foreign_key_violation(&err));
        assert!(matches!(
            insert_error(sqlx::Error::RowNotFound, "exists", "missing"),
            StoreError::Unexpected(_)
        ));
    }

    #[test]
    fn role_rows_require_a_consistent_scope() {
        let row = DbRole {
            role_id: "r1".to_string(),
            name: "editor".to_string(),
            description: String::new(),
            is_system: true,
            tenant_id: Some("t1".to_string()),
        };
        assert!(role_from_db(row).is_err());

        let row = DbRole {
            role_id: "r2".to_string(),
            name: "editor".to_string(),
            description: String::new(),
            is_system: false,
            tenant_id: Some("t1".to_string()),
        };
        let role = role_from_db(row).expect("tenant role");
        assert!(!role.is_system());
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        let row = DbUserRole {
            user_id: "u1".to_string(),
            role_id: "r1".to_string(),
            tenant_id: "t1".to_string(),
            status: "paused".to_string(),
        };
        assert!(user_role_from_db(row).is_err());
    }
}
