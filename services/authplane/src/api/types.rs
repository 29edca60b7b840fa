//! HTTP API request/response types.
//!
//! # Purpose
//! Defines shared payload shapes for the authplane REST API and OpenAPI schema generation.
use crate::auth::rbac::defaults::SeededRole;
use crate::model::{AssignmentStatus, Permission, Role, TenantDomain, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
    pub backend: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AuthzCheckQuery {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AuthzCheckResponse {
    pub resource: String,
    pub action: String,
    pub allowed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserPermissionsResponse {
    pub user_id: String,
    pub tenant_id: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AssignRoleRequest {
    pub role_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AssignmentStatusRequest {
    pub status: AssignmentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct AssignmentResponse {
    pub assignment: UserRole,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleListResponse {
    pub items: Vec<Role>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct GrantPermissionRequest {
    /// Permission id or unique name such as `users:read`.
    pub permission: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PermissionListResponse {
    pub items: Vec<Permission>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct DomainCreateRequest {
    pub domain: String,
}

/// Returned once on registration; the token is not readable afterwards.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct DomainCreateResponse {
    pub domain: TenantDomain,
    /// Must be served verbatim at `challenge_url` before verification succeeds.
    pub verification_token: String,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub challenge_url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DomainListResponse {
    pub items: Vec<TenantDomain>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DefaultRolesResponse {
    pub tenant_id: String,
    pub roles: Vec<SeededRole>,
}
