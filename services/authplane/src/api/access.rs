//! Tenant-scoped access API handlers.
//!
//! # Purpose and responsibility
//! Exposes the caller's own context, ad-hoc permission checks, and administration of
//! roles, assignments and custom domains within the resolved tenant.
//!
//! # Key invariants and assumptions
//! - Every handler here runs behind the request pipeline, so a [`RequestContext`] with a
//!   resolved tenant is always present.
//! - The tenant always comes from the context, never from the path or body.
use crate::api::error::ApiError;
use crate::api::types::{
    AssignRoleRequest, AssignmentResponse, AssignmentStatusRequest, AuthzCheckQuery,
    AuthzCheckResponse, DomainCreateRequest, DomainCreateResponse, DomainListResponse,
    GrantPermissionRequest, PermissionListResponse, RoleCreateRequest,
    RoleListResponse, UserPermissionsResponse,
};
use crate::app::AppState;
use crate::auth::pipeline::RequestContext;
use crate::auth::rbac::Authorizer;
use crate::model::{Permission, Role, TenantDomain};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "access",
    responses(
        (status = 200, description = "Caller context", body = RequestContext),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    )
)]
pub(crate) async fn me(context: RequestContext) -> Json<RequestContext> {
    Json(context)
}

#[utoipa::path(
    get,
    path = "/v1/authz/check",
    tag = "access",
    params(
        ("resource" = String, Query, description = "Resource name"),
        ("action" = String, Query, description = "Action name")
    ),
    responses((status = 200, description = "Decision for the caller", body = AuthzCheckResponse))
)]
pub(crate) async fn authz_check(
    State(state): State<AppState>,
    context: RequestContext,
    Query(query): Query<AuthzCheckQuery>,
) -> Result<Json<AuthzCheckResponse>, ApiError> {
    let tenant = context.tenant()?;
    let allowed = state
        .engine
        .can(&context.subject, &query.resource, &query.action, tenant)
        .await;
    Ok(Json(AuthzCheckResponse {
        resource: query.resource,
        action: query.action,
        allowed,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/permissions",
    tag = "access",
    params(("user_id" = String, Path, description = "User identifier")),
    responses((status = 200, description = "Effective permissions", body = UserPermissionsResponse))
)]
pub(crate) async fn user_permissions(
    State(state): State<AppState>,
    context: RequestContext,
    Path(user_id): Path<String>,
) -> Result<Json<UserPermissionsResponse>, ApiError> {
    let tenant = context.tenant()?;
    let permissions = state.engine.user_permissions(&user_id, tenant).await;
    Ok(Json(UserPermissionsResponse {
        user_id,
        tenant_id: tenant.to_string(),
        permissions: permissions.into_iter().collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/roles",
    tag = "access",
    params(("user_id" = String, Path, description = "User identifier")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = AssignmentResponse),
        (status = 403, description = "System role, or the role grants permissions the caller lacks"),
        (status = 404, description = "Role not found")
    )
)]
pub(crate) async fn assign_role(
    State(state): State<AppState>,
    context: RequestContext,
    Path(user_id): Path<String>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<(StatusCode, Json<AssignmentResponse>), ApiError> {
    let tenant = context.tenant()?;
    let assignment = state
        .admin
        .assign_role(tenant, &context.subject, &user_id, &body.role_id)
        .await?;
    Ok((StatusCode::CREATED, Json(AssignmentResponse { assignment })))
}

#[utoipa::path(
    delete,
    path = "/v1/users/{user_id}/roles/{role_id}",
    tag = "access",
    params(
        ("user_id" = String, Path, description = "User identifier"),
        ("role_id" = String, Path, description = "Role identifier")
    ),
    responses((status = 204), (status = 404))
)]
pub(crate) async fn revoke_role(
    State(state): State<AppState>,
    context: RequestContext,
    Path((user_id, role_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = context.tenant()?;
    state.admin.revoke_role(tenant, &user_id, &role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/v1/users/{user_id}/roles/{role_id}/status",
    tag = "access",
    params(
        ("user_id" = String, Path, description = "User identifier"),
        ("role_id" = String, Path, description = "Role identifier")
    ),
    request_body = AssignmentStatusRequest,
    responses(
        (status = 200, body = AssignmentResponse),
        (status = 403, description = "System role, or reactivation beyond the caller's permissions"),
        (status = 404)
    )
)]
pub(crate) async fn set_assignment_status(
    State(state): State<AppState>,
    context: RequestContext,
    Path((user_id, role_id)): Path<(String, String)>,
    Json(body): Json<AssignmentStatusRequest>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let tenant = context.tenant()?;
    let assignment = state
        .admin
        .set_assignment_status(tenant, &context.subject, &user_id, &role_id, body.status)
        .await?;
    Ok(Json(AssignmentResponse { assignment }))
}

#[utoipa::path(
    get,
    path = "/v1/roles",
    tag = "access",
    responses((status = 200, description = "Tenant and system roles", body = RoleListResponse))
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<RoleListResponse>, ApiError> {
    let tenant = context.tenant()?;
    let items = state.admin.list_roles(tenant).await?;
    Ok(Json(RoleListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v1/roles",
    tag = "access",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name exists")
    )
)]
pub(crate) async fn create_role(
    State(state): State<AppState>,
    context: RequestContext,
    Json(body): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    let tenant = context.tenant()?;
    let role = state
        .admin
        .create_role(tenant, &body.name, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}",
    tag = "access",
    params(("role_id" = String, Path, description = "Role identifier")),
    responses(
        (status = 204),
        (status = 403, description = "System roles are protected"),
        (status = 404)
    )
)]
pub(crate) async fn delete_role(
    State(state): State<AppState>,
    context: RequestContext,
    Path(role_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant = context.tenant()?;
    state.admin.delete_role(tenant, &role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/roles/{role_id}/permissions",
    tag = "access",
    params(("role_id" = String, Path, description = "Role identifier")),
    responses((status = 200, body = PermissionListResponse), (status = 404))
)]
pub(crate) async fn list_role_permissions(
    State(state): State<AppState>,
    context: RequestContext,
    Path(role_id): Path<String>,
) -> Result<Json<PermissionListResponse>, ApiError> {
    let tenant = context.tenant()?;
    let items = state.admin.list_role_permissions(tenant, &role_id).await?;
    Ok(Json(PermissionListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v1/roles/{role_id}/permissions",
    tag = "access",
    params(("role_id" = String, Path, description = "Role identifier")),
    request_body = GrantPermissionRequest,
    responses(
        (status = 200, description = "Permission granted", body = Permission),
        (status = 403, description = "System role, or a permission the caller lacks"),
        (status = 404)
    )
)]
pub(crate) async fn grant_permission(
    State(state): State<AppState>,
    context: RequestContext,
    Path(role_id): Path<String>,
    Json(body): Json<GrantPermissionRequest>,
) -> Result<Json<Permission>, ApiError> {
    let tenant = context.tenant()?;
    let permission = state
        .admin
        .grant_role_permission(tenant, &context.subject, &role_id, &body.permission)
        .await?;
    Ok(Json(permission))
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}/permissions/{permission_id}",
    tag = "access",
    params(
        ("role_id" = String, Path, description = "Role identifier"),
        ("permission_id" = String, Path, description = "Permission id or name")
    ),
    responses((status = 204), (status = 403), (status = 404))
)]
pub(crate) async fn revoke_permission(
    State(state): State<AppState>,
    context: RequestContext,
    Path((role_id, permission_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = context.tenant()?;
    state
        .admin
        .revoke_role_permission(tenant, &role_id, &permission_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/domains",
    tag = "domains",
    responses((status = 200, body = DomainListResponse))
)]
pub(crate) async fn list_domains(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<DomainListResponse>, ApiError> {
    let tenant = context.tenant()?;
    let items = state.admin.list_domains(tenant).await?;
    Ok(Json(DomainListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v1/domains",
    tag = "domains",
    request_body = DomainCreateRequest,
    responses(
        (status = 201, description = "Domain registered, pending verification", body = DomainCreateResponse),
        (status = 400, description = "Invalid host"),
        (status = 409, description = "Domain already registered")
    )
)]
pub(crate) async fn add_domain(
    State(state): State<AppState>,
    context: RequestContext,
    Json(body): Json<DomainCreateRequest>,
) -> Result<(StatusCode, Json<DomainCreateResponse>), ApiError> {
    let tenant = context.tenant()?;
    let mut domain = state.admin.add_domain(tenant, &body.domain).await?;
    let verification_token = domain.verification_token.take().unwrap_or_default();
    let verification_expires_at = domain.expires_at;
    let challenge_url = state.admin.challenge_url(&domain.domain);
    Ok((
        StatusCode::CREATED,
        Json(DomainCreateResponse {
            domain,
            verification_token,
            verification_expires_at,
            challenge_url,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/domains/{domain}/verify",
    tag = "domains",
    params(("domain" = String, Path, description = "Host name")),
    responses(
        (status = 200, description = "Domain verified", body = TenantDomain),
        (status = 400, description = "Challenge URL unreachable or not serving the token"),
        (status = 404),
        (status = 410, description = "Verification window elapsed")
    )
)]
pub(crate) async fn verify_domain(
    State(state): State<AppState>,
    context: RequestContext,
    Path(domain): Path<String>,
) -> Result<Json<TenantDomain>, ApiError> {
    let tenant = context.tenant()?;
    let domain = state.admin.verify_domain(tenant, &domain).await?;
    Ok(Json(domain))
}

#[utoipa::path(
    delete,
    path = "/v1/domains/{domain}",
    tag = "domains",
    params(("domain" = String, Path, description = "Host name")),
    responses((status = 204), (status = 404))
)]
pub(crate) async fn remove_domain(
    State(state): State<AppState>,
    context: RequestContext,
    Path(domain): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant = context.tenant()?;
    state.admin.remove_domain(tenant, &domain).await?;
    Ok(StatusCode::NO_CONTENT)
}
