//! Per-request admission: tenant resolution, token validation, authorization.
//!
//! # Purpose
//! [`RequestPipeline::admit`] runs the three checks in order and either produces a
//! [`RequestContext`] or a typed [`Rejection`]. [`guard`] wires it into axum as route
//! middleware and [`RequestContext`] is extracted by handlers.
//!
//! # Key invariants
//! - A token whose tenant claim differs from the resolved tenant never reaches the engine.
//! - Authorization always consults the live engine; permissions carried by the token are
//!   ignored for decisions.
//! - System-admin routes skip tenant resolution and require the configured realm role.
//! - Rejection bodies are generic; the cause is logged.
use crate::api::error::{
    ApiError, api_forbidden, api_not_found, api_unauthorized, api_unavailable,
};
use crate::auth::error::AuthError;
use crate::auth::rbac::AuthorizationEngine;
use crate::auth::tenant::TenantResolver;
use crate::auth::token::TokenValidator;
use crate::observability::PIPELINE_REJECTIONS_TOTAL;
use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tenantry_authz::{TenantId, TokenClaims};
use utoipa::ToSchema;

/// Access requirement declared per route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Permission {
        resource: &'static str,
        action: &'static str,
    },
    SystemAdmin,
}

impl RouteAccess {
    pub const fn permission(resource: &'static str, action: &'static str) -> Self {
        Self::Permission { resource, action }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TenantNotFound,
    Unauthenticated(AuthError),
    TenantMismatch,
    Forbidden,
    UpstreamUnavailable(String),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TenantNotFound => "tenant_not_found",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::TenantMismatch => "tenant_mismatch",
            Self::Forbidden => "forbidden",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    fn from_auth(err: AuthError) -> Self {
        match err {
            AuthError::TenantNotFound => Self::TenantNotFound,
            AuthError::UpstreamUnavailable(detail) => Self::UpstreamUnavailable(detail),
            other => Self::Unauthenticated(other),
        }
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::TenantNotFound => api_not_found("not found"),
            Rejection::Unauthenticated(_) => api_unauthorized("unauthorized"),
            Rejection::TenantMismatch | Rejection::Forbidden => api_forbidden("forbidden"),
            Rejection::UpstreamUnavailable(_) => api_unavailable("upstream unavailable"),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Caller identity attached to admitted requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RequestContext {
    /// Absent on platform-level routes.
    #[schema(value_type = Option<String>)]
    pub tenant_id: Option<TenantId>,
    pub subject: String,
    pub permissions: BTreeSet<String>,
    pub realm_roles: BTreeSet<String>,
}

impl RequestContext {
    /// Tenant of a tenant-scoped route.
    pub fn tenant(&self) -> Result<&TenantId, Rejection> {
        self.tenant_id.as_ref().ok_or(Rejection::TenantNotFound)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| {
                Rejection::Unauthenticated(AuthError::Malformed("request was not admitted".into()))
            })
    }
}

pub struct RequestPipeline {
    resolver: TenantResolver,
    validator: TokenValidator,
    engine: Arc<AuthorizationEngine>,
    system_admin_role: String,
}

impl RequestPipeline {
    pub fn new(
        resolver: TenantResolver,
        validator: TokenValidator,
        engine: Arc<AuthorizationEngine>,
        system_admin_role: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            validator,
            engine,
            system_admin_role: system_admin_role.into(),
        }
    }

    /// Admit a request. `Ok(None)` means a public route with nothing to attach.
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        access: &RouteAccess,
    ) -> Result<Option<RequestContext>, Rejection> {
        let result = self.admit_inner(headers, access).await;
        if let Err(rejection) = &result {
            metrics::counter!(PIPELINE_REJECTIONS_TOTAL, "reason" => rejection.reason())
                .increment(1);
            match rejection {
                Rejection::Unauthenticated(err) => {
                    tracing::debug!(reason = rejection.reason(), error = %err, "request rejected")
                }
                Rejection::UpstreamUnavailable(detail) => {
                    tracing::warn!(reason = rejection.reason(), detail = %detail, "request rejected")
                }
                _ => tracing::debug!(reason = rejection.reason(), "request rejected"),
            }
        }
        result
    }

    async fn admit_inner(
        &self,
        headers: &HeaderMap,
        access: &RouteAccess,
    ) -> Result<Option<RequestContext>, Rejection> {
        match access {
            RouteAccess::Public => Ok(None),
            RouteAccess::SystemAdmin => {
                let claims = self.authenticate(headers).await?;
                if !claims.has_realm_role(&self.system_admin_role) {
                    return Err(Rejection::Forbidden);
                }
                Ok(Some(RequestContext {
                    tenant_id: None,
                    subject: claims.subject,
                    permissions: BTreeSet::new(),
                    realm_roles: claims.realm_roles,
                }))
            }
            RouteAccess::Permission { resource, action } => {
                let tenant = self
                    .resolver
                    .resolve_request(headers)
                    .await
                    .map_err(Rejection::from_auth)?;
                let claims = self.authenticate(headers).await?;
                if !claims.is_issued_for(&tenant) {
                    return Err(Rejection::TenantMismatch);
                }
                if !self
                    .engine
                    .enforce(&claims.subject, resource, action, &tenant)
                    .await
                {
                    return Err(Rejection::Forbidden);
                }
                let permissions = self.engine.user_permissions(&claims.subject, &tenant).await;
                Ok(Some(RequestContext {
                    tenant_id: Some(tenant),
                    subject: claims.subject,
                    permissions,
                    realm_roles: claims.realm_roles,
                }))
            }
        }
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<TokenClaims, Rejection> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                Rejection::Unauthenticated(AuthError::Malformed("missing authorization".into()))
            })?;
        self.validator
            .validate(authorization)
            .await
            .map_err(Rejection::from_auth)
    }
}

/// Route middleware enforcing `access` before the handler runs.
pub async fn guard(
    State((pipeline, access)): State<(Arc<RequestPipeline>, RouteAccess)>,
    mut request: Request,
    next: Next,
) -> Response {
    match pipeline.admit(request.headers(), &access).await {
        Ok(Some(context)) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_generic_responses() {
        let cases = [
            (Rejection::TenantNotFound, 404, "not found"),
            (
                Rejection::Unauthenticated(AuthError::ExpiredToken),
                401,
                "unauthorized",
            ),
            (Rejection::TenantMismatch, 403, "forbidden"),
            (Rejection::Forbidden, 403, "forbidden"),
            (
                Rejection::UpstreamUnavailable("jwks timed out".into()),
                503,
                "upstream unavailable",
            ),
        ];
        for (rejection, status, message) in cases {
            let api = ApiError::from(rejection);
            assert_eq!(api.status.as_u16(), status);
            assert_eq!(api.body.message, message);
        }
    }

    #[test]
    fn auth_errors_split_by_cause() {
        assert_eq!(
            Rejection::from_auth(AuthError::TenantNotFound),
            Rejection::TenantNotFound
        );
        assert_eq!(
            Rejection::from_auth(AuthError::UnknownKey),
            Rejection::Unauthenticated(AuthError::UnknownKey)
        );
        assert!(matches!(
            Rejection::from_auth(AuthError::UpstreamUnavailable("down".into())),
            Rejection::UpstreamUnavailable(_)
        ));
    }

    #[test]
    fn context_without_tenant_is_rejected_for_tenant_routes() {
        let context = RequestContext {
            tenant_id: None,
            subject: "root".to_string(),
            permissions: BTreeSet::new(),
            realm_roles: BTreeSet::from(["system-admin".to_string()]),
        };
        assert_eq!(context.tenant(), Err(Rejection::TenantNotFound));
        assert!(!context.has_permission("users:read"));
    }
}
