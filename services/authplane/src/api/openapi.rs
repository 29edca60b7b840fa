//! OpenAPI schema aggregation for the authplane API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document for docs
//! and client generation.
use crate::api::{
    access, platform, system,
    types::{
        AssignRoleRequest, AssignmentResponse, AssignmentStatusRequest, AuthzCheckResponse,
        DefaultRolesResponse, DomainCreateRequest, DomainCreateResponse, DomainListResponse,
        ErrorResponse, GrantPermissionRequest, HealthStatus,
        PermissionListResponse, RoleCreateRequest, RoleListResponse, UserPermissionsResponse,
    },
};
use crate::auth::pipeline::RequestContext;
use crate::auth::rbac::SyncReport;
use crate::auth::rbac::defaults::SeededRole;
use crate::model::{AssignmentStatus, Permission, Role, TenantDomain, UserRole};
use tenantry_authz::RoleScope;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tenantry-authplane",
        version = "v1",
        description = "Tenant-aware identity and authorization API"
    ),
    paths(
        system::system_health,
        access::me,
        access::authz_check,
        access::user_permissions,
        access::assign_role,
        access::revoke_role,
        access::set_assignment_status,
        access::list_roles,
        access::create_role,
        access::delete_role,
        access::list_role_permissions,
        access::grant_permission,
        access::revoke_permission,
        access::list_domains,
        access::add_domain,
        access::verify_domain,
        access::remove_domain,
        platform::create_default_roles,
        platform::provision_role,
        platform::sync_all
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        RequestContext,
        AuthzCheckResponse,
        UserPermissionsResponse,
        AssignRoleRequest,
        AssignmentStatusRequest,
        AssignmentResponse,
        AssignmentStatus,
        UserRole,
        Role,
        RoleScope,
        RoleCreateRequest,
        RoleListResponse,
        Permission,
        PermissionListResponse,
        GrantPermissionRequest,
        TenantDomain,
        DomainCreateRequest,
        DomainCreateResponse,
        DomainListResponse,
        SeededRole,
        DefaultRolesResponse,
        SyncReport
    )),
    tags(
        (name = "system", description = "Health endpoints"),
        (name = "access", description = "Roles, assignments and permission checks"),
        (name = "domains", description = "Custom domain registration and verification"),
        (name = "platform", description = "Cross-tenant provisioning")
    )
)]
pub struct ApiDoc;
