//! Authplane HTTP application wiring.
//!
//! # Purpose
//! Builds the shared application state from configuration and a store, and composes the
//! Axum router with per-route access requirements.
//!
//! # Notes
//! This module centralizes route composition and state wiring to keep `main` small and
//! testable. Each route declares its [`RouteAccess`] next to its handler.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::auth::admin::AccessAdmin;
use crate::auth::challenge::DomainChallenge;
use crate::auth::keys::KeyMaterialCache;
use crate::auth::pipeline::{RequestPipeline, RouteAccess, guard};
use crate::auth::rbac::{AuthorizationEngine, RoleDefaults, Synchronizer};
use crate::auth::tenant::TenantResolver;
use crate::auth::token::TokenValidator;
use crate::config::AuthplaneConfig;
use crate::observability;
use crate::store::{AuthplaneStore, DirectoryStore};
use anyhow::Context;
use axum::Router;
use axum::middleware;
use axum::routing::{MethodRouter, delete, get, post, put};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DirectoryStore>,
    pub engine: Arc<AuthorizationEngine>,
    pub synchronizer: Synchronizer,
    pub defaults: Arc<RoleDefaults>,
    pub admin: AccessAdmin,
    pub pipeline: Arc<RequestPipeline>,
}

/// Wire every component over `store` and bring the engine up to date.
///
/// Runs the boot steps that need the store: bulk policy load, system defaults, and the
/// optional full reconcile.
pub async fn build_state_with_store<S>(
    config: &AuthplaneConfig,
    store: Arc<S>,
) -> anyhow::Result<AppState>
where
    S: AuthplaneStore + 'static,
{
    let directory: Arc<dyn DirectoryStore> = store.clone();
    let engine = Arc::new(
        AuthorizationEngine::new(store.clone())
            .await
            .context("build authorization engine")?,
    );
    engine
        .load_from_store()
        .await
        .context("load policy store")?;

    let synchronizer = Synchronizer::new(Arc::clone(&directory), Arc::clone(&engine));
    let defaults = Arc::new(RoleDefaults::new(
        Arc::clone(&directory),
        synchronizer.clone(),
    ));
    defaults
        .ensure_system_defaults()
        .await
        .context("ensure system defaults")?;
    if config.reconcile_on_start {
        synchronizer
            .sync_all()
            .await
            .context("reconcile authorization policy")?;
    }

    let keys = KeyMaterialCache::new(
        config.identity.jwks_url(),
        config.identity.jwks_ttl(),
        config.identity.jwks_fetch_timeout(),
        config.identity.jwks_min_refresh_interval(),
    );
    let validator = TokenValidator::new(&config.identity, keys);
    let resolver = TenantResolver::new(&config.tenancy, Arc::clone(&directory));
    let challenge = DomainChallenge::new(&config.tenancy).context("build domain challenge client")?;
    let admin = AccessAdmin::new(
        Arc::clone(&directory),
        synchronizer.clone(),
        resolver.clone(),
        challenge,
        config.tenancy.domain_verification_ttl(),
    );
    let pipeline = Arc::new(RequestPipeline::new(
        resolver,
        validator,
        Arc::clone(&engine),
        config.identity.system_admin_role.clone(),
    ));

    Ok(AppState {
        store: directory,
        engine,
        synchronizer,
        defaults,
        admin,
        pipeline,
    })
}

fn guarded(
    pipeline: &Arc<RequestPipeline>,
    access: RouteAccess,
    route: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(
        (Arc::clone(pipeline), access),
        guard,
    ))
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    let pipeline = Arc::clone(&state.pipeline);
    let p = &pipeline;
    let profile_read = RouteAccess::permission("profile", "read");
    let users_read = RouteAccess::permission("users", "read");
    let users_manage = RouteAccess::permission("users", "manage");
    let roles_read = RouteAccess::permission("roles", "read");
    let roles_manage = RouteAccess::permission("roles", "manage");
    let settings_read = RouteAccess::permission("settings", "read");
    let settings_manage = RouteAccess::permission("settings", "manage");

    Router::new()
        .route("/v1/system/health", get(api::system::system_health))
        .route(
            "/v1/me",
            guarded(p, profile_read.clone(), get(api::access::me)),
        )
        .route(
            "/v1/authz/check",
            guarded(p, profile_read, get(api::access::authz_check)),
        )
        .route(
            "/v1/users/:user_id/permissions",
            guarded(p, users_read, get(api::access::user_permissions)),
        )
        .route(
            "/v1/users/:user_id/roles",
            guarded(p, users_manage.clone(), post(api::access::assign_role)),
        )
        .route(
            "/v1/users/:user_id/roles/:role_id",
            guarded(p, users_manage.clone(), delete(api::access::revoke_role)),
        )
        .route(
            "/v1/users/:user_id/roles/:role_id/status",
            guarded(p, users_manage, put(api::access::set_assignment_status)),
        )
        .route(
            "/v1/roles",
            guarded(p, roles_read.clone(), get(api::access::list_roles)).merge(guarded(
                p,
                roles_manage.clone(),
                post(api::access::create_role),
            )),
        )
        .route(
            "/v1/roles/:role_id",
            guarded(p, roles_manage.clone(), delete(api::access::delete_role)),
        )
        .route(
            "/v1/roles/:role_id/permissions",
            guarded(p, roles_read, get(api::access::list_role_permissions)).merge(guarded(
                p,
                roles_manage.clone(),
                post(api::access::grant_permission),
            )),
        )
        .route(
            "/v1/roles/:role_id/permissions/:permission_id",
            guarded(p, roles_manage, delete(api::access::revoke_permission)),
        )
        .route(
            "/v1/domains",
            guarded(p, settings_read, get(api::access::list_domains)).merge(guarded(
                p,
                settings_manage.clone(),
                post(api::access::add_domain),
            )),
        )
        .route(
            "/v1/domains/:domain/verify",
            guarded(p, settings_manage.clone(), post(api::access::verify_domain)),
        )
        .route(
            "/v1/domains/:domain",
            guarded(p, settings_manage, delete(api::access::remove_domain)),
        )
        .route(
            "/v1/platform/tenants/:tenant_id/default-roles",
            guarded(
                p,
                RouteAccess::SystemAdmin,
                post(api::platform::create_default_roles),
            ),
        )
        .route(
            "/v1/platform/tenants/:tenant_id/users/:user_id/roles",
            guarded(
                p,
                RouteAccess::SystemAdmin,
                post(api::platform::provision_role),
            ),
        )
        .route(
            "/v1/platform/sync",
            guarded(p, RouteAccess::SystemAdmin, post(api::platform::sync_all)),
        )
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
