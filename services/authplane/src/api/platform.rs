//! Platform-level provisioning handlers.
//!
//! # Purpose and responsibility
//! Operations that act across tenants and are reserved to callers holding the
//! system-admin realm role.
use crate::api::error::{ApiError, api_not_found};
use crate::api::types::{AssignRoleRequest, AssignmentResponse, DefaultRolesResponse};
use crate::app::AppState;
use crate::auth::pipeline::RequestContext;
use crate::auth::rbac::SyncReport;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tenantry_authz::TenantId;

#[utoipa::path(
    post,
    path = "/v1/platform/tenants/{tenant_id}/default-roles",
    tag = "platform",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Default roles ensured", body = DefaultRolesResponse),
        (status = 403, description = "Caller is not a system admin"),
        (status = 404, description = "Tenant not found")
    )
)]
pub(crate) async fn create_default_roles(
    State(state): State<AppState>,
    context: RequestContext,
    Path(tenant_id): Path<String>,
) -> Result<Json<DefaultRolesResponse>, ApiError> {
    let tenant = TenantId::parse(&tenant_id).map_err(|_| api_not_found("tenant not found"))?;
    let roles = state.defaults.create_default_tenant_roles(&tenant).await?;
    tracing::info!(tenant = %tenant, actor = %context.subject, "default roles provisioned");
    Ok(Json(DefaultRolesResponse {
        tenant_id: tenant.into_inner(),
        roles,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/platform/tenants/{tenant_id}/users/{user_id}/roles",
    tag = "platform",
    params(
        ("tenant_id" = String, Path, description = "Tenant identifier"),
        ("user_id" = String, Path, description = "User identifier")
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned, system roles included", body = AssignmentResponse),
        (status = 403, description = "Caller is not a system admin"),
        (status = 404, description = "Tenant or role not found")
    )
)]
pub(crate) async fn provision_role(
    State(state): State<AppState>,
    context: RequestContext,
    Path((tenant_id, user_id)): Path<(String, String)>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<(StatusCode, Json<AssignmentResponse>), ApiError> {
    let tenant = TenantId::parse(&tenant_id).map_err(|_| api_not_found("tenant not found"))?;
    let assignment = state
        .admin
        .provision_role(&tenant, &user_id, &body.role_id)
        .await?;
    tracing::info!(
        tenant = %tenant,
        user_id,
        role_id = %body.role_id,
        actor = %context.subject,
        "role provisioned"
    );
    Ok((StatusCode::CREATED, Json(AssignmentResponse { assignment })))
}

#[utoipa::path(
    post,
    path = "/v1/platform/sync",
    tag = "platform",
    responses(
        (status = 200, description = "Projection rebuilt", body = SyncReport),
        (status = 403, description = "Caller is not a system admin")
    )
)]
pub(crate) async fn sync_all(
    State(state): State<AppState>,
    context: RequestContext,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.synchronizer.sync_all().await?;
    tracing::info!(actor = %context.subject, "authorization projection rebuilt on request");
    Ok(Json(report))
}
