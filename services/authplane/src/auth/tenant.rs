//! Host-to-tenant resolution.
//!
//! # Purpose
//! Maps an inbound request to exactly one tenant, from a platform subdomain, a verified custom
//! domain, or a trusted service override.
//!
//! # Key invariants
//! - `{slug}.{platform_domain}` resolves to `slug` without any lookup when the slug is a single
//!   DNS label outside the reserved list. Other platform hosts, including the apex, fail.
//! - Custom domains resolve only when verified and unexpired; everything else fails closed.
//! - Lookup results, negative ones included, are cached until the TTL elapses or the domain
//!   is mutated through [`TenantResolver::invalidate`].
//! - The override headers are honored only when a service token is configured and the
//!   presented token matches it in constant time.
use crate::auth::error::AuthError;
use crate::config::TenancyConfig;
use crate::model::normalize_host;
use crate::observability::TENANT_RESOLUTION_TOTAL;
use crate::store::DirectoryStore;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tenantry_authz::{TenantId, TtlCache, is_dns_label};

pub const TENANT_OVERRIDE_HEADER: &str = "x-tenant-id";
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

#[derive(Clone)]
pub struct TenantResolver {
    store: Arc<dyn DirectoryStore>,
    platform_domain: String,
    reserved: BTreeSet<String>,
    lookup_timeout: Duration,
    service_token: Option<String>,
    cache: Arc<TtlCache<String, Option<TenantId>>>,
}

fn record(path: &'static str, outcome: &'static str) {
    metrics::counter!(TENANT_RESOLUTION_TOTAL, "path" => path, "outcome" => outcome).increment(1);
}

impl TenantResolver {
    pub fn new(config: &TenancyConfig, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            platform_domain: config.platform_domain.clone(),
            reserved: config.reserved_subdomains.iter().cloned().collect(),
            lookup_timeout: config.domain_lookup_timeout(),
            service_token: config.service_token.clone(),
            cache: Arc::new(TtlCache::new(config.domain_cache_ttl())),
        }
    }

    /// Resolve the tenant for a request, honoring the trusted override before the host.
    ///
    /// # Errors
    /// - [`AuthError::TenantNotFound`] when no tenant maps to the request.
    /// - [`AuthError::UpstreamUnavailable`] when the domain lookup fails or times out.
    pub async fn resolve_request(&self, headers: &HeaderMap) -> Result<TenantId, AuthError> {
        if let Some(tenant) = self.trusted_override(headers)? {
            record("override", "ok");
            return Ok(tenant);
        }
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::TenantNotFound)?;
        self.resolve(host).await
    }

    /// Resolve a host name to its tenant.
    ///
    /// # Errors
    /// - [`AuthError::TenantNotFound`] for unknown, unverified, expired, reserved or apex hosts.
    /// - [`AuthError::UpstreamUnavailable`] when the domain lookup fails or times out.
    pub async fn resolve(&self, host: &str) -> Result<TenantId, AuthError> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(AuthError::TenantNotFound);
        }
        if host == self.platform_domain {
            record("subdomain", "not_found");
            return Err(AuthError::TenantNotFound);
        }
        if let Some(prefix) = host
            .strip_suffix(self.platform_domain.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
        {
            return match TenantId::parse(prefix) {
                Ok(tenant) if !self.reserved.contains(prefix) => {
                    record("subdomain", "ok");
                    Ok(tenant)
                }
                _ => {
                    record("subdomain", "not_found");
                    Err(AuthError::TenantNotFound)
                }
            };
        }
        self.resolve_custom(host).await
    }

    async fn resolve_custom(&self, host: String) -> Result<TenantId, AuthError> {
        let store = Arc::clone(&self.store);
        let timeout = self.lookup_timeout;
        let lookup_host = host.clone();
        let result = self
            .cache
            .get_or_refresh(&host, || async move {
                let found = tokio::time::timeout(timeout, store.find_domain(&lookup_host))
                    .await
                    .map_err(|_| AuthError::UpstreamUnavailable("domain lookup timed out".into()))?
                    .map_err(|err| AuthError::UpstreamUnavailable(err.to_string()))?;
                let now = Utc::now();
                Ok::<_, AuthError>(
                    found
                        .filter(|domain| domain.resolves_at(now))
                        .map(|domain| TenantId::new(domain.tenant_id)),
                )
            })
            .await;
        match result {
            Ok(Some(tenant)) => {
                record("custom", "ok");
                Ok(tenant)
            }
            Ok(None) => {
                record("custom", "not_found");
                Err(AuthError::TenantNotFound)
            }
            Err(err) => {
                record("custom", "error");
                tracing::warn!(host = %host, error = %err, "custom domain lookup failed");
                Err(err)
            }
        }
    }

    fn trusted_override(&self, headers: &HeaderMap) -> Result<Option<TenantId>, AuthError> {
        let Some(expected) = self.service_token.as_deref() else {
            return Ok(None);
        };
        let (Some(tenant), Some(presented)) = (
            headers.get(TENANT_OVERRIDE_HEADER),
            headers.get(SERVICE_TOKEN_HEADER),
        ) else {
            return Ok(None);
        };
        if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            tracing::warn!("tenant override presented with an invalid service token");
            return Ok(None);
        }
        let tenant = tenant
            .to_str()
            .ok()
            .filter(|value| is_dns_label(value))
            .ok_or(AuthError::TenantNotFound)?;
        TenantId::parse(tenant)
            .map(Some)
            .map_err(|_| AuthError::TenantNotFound)
    }

    /// Drop any cached resolution for `domain`.
    pub fn invalidate(&self, domain: &str) {
        self.cache.invalidate(&normalize_host(domain));
    }

    pub fn platform_domain(&self) -> &str {
        &self.platform_domain
    }
}
