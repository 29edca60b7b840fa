//! Authplane configuration sourced from environment variables with an optional YAML override.
//!
//! # Purpose
//! Collects listener addresses, storage backend selection, identity-provider settings and
//! tenancy settings into one [`AuthplaneConfig`].
//!
//! # Precedence
//! Defaults, then `TENANTRY_AP_*` environment variables, then the YAML file named by
//! `TENANTRY_AP_CONFIG`. Every parse failure names the offending variable or key.
//!
//! # Security
//! The Postgres URL and the service token are secrets; they are never logged.
use anyhow::{Context, Result, bail};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8443";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_PROVIDER_URL: &str = "http://localhost:8180";
pub const DEFAULT_REALM: &str = "tenantry";
pub const DEFAULT_LEEWAY_SECS: u64 = 30;
pub const DEFAULT_JWKS_TTL_SECS: u64 = 300;
pub const DEFAULT_JWKS_FETCH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_PLATFORM_DOMAIN: &str = "tenantry.localhost";
pub const DEFAULT_RESERVED_SUBDOMAINS: [&str; 3] = ["www", "api", "admin"];
pub const DEFAULT_DOMAIN_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_DOMAIN_LOOKUP_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_TENANT_CLAIM: &str = "tenant_id";
pub const DEFAULT_PERMISSIONS_CLAIM: &str = "tenant_permissions";
pub const DEFAULT_SYSTEM_ADMIN_ROLE: &str = "system-admin";
pub const DEFAULT_DOMAIN_VERIFICATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_DOMAIN_CHALLENGE_URL: &str =
    "http://{domain}/.well-known/tenantry-domain-verification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => bail!("unknown storage backend {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Identity provider and token validation settings.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub provider_url: String,
    pub realm: String,
    /// Overrides the derived `{issuer}/protocol/openid-connect/certs` endpoint.
    pub jwks_url: Option<String>,
    pub audience: Option<String>,
    pub algorithm: Algorithm,
    pub leeway_secs: u64,
    pub jwks_ttl_secs: u64,
    pub jwks_fetch_timeout_ms: u64,
    /// Minimum spacing between refetches forced by an unknown key id.
    pub jwks_min_refresh_interval_ms: u64,
    pub tenant_claim: String,
    pub permissions_claim: String,
    pub system_admin_role: String,
}

impl IdentityConfig {
    /// Expected `iss` value: `{provider_url}/realms/{realm}`.
    pub fn issuer(&self) -> String {
        format!(
            "{}/realms/{}",
            self.provider_url.trim_end_matches('/'),
            self.realm
        )
    }

    pub fn jwks_url(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| format!("{}/protocol/openid-connect/certs", self.issuer()))
    }

    pub fn jwks_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_ttl_secs)
    }

    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.jwks_fetch_timeout_ms)
    }

    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.jwks_min_refresh_interval_ms)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            realm: DEFAULT_REALM.to_string(),
            jwks_url: None,
            audience: None,
            algorithm: Algorithm::RS256,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            jwks_ttl_secs: DEFAULT_JWKS_TTL_SECS,
            jwks_fetch_timeout_ms: DEFAULT_JWKS_FETCH_TIMEOUT_MS,
            jwks_min_refresh_interval_ms: DEFAULT_JWKS_MIN_REFRESH_INTERVAL_MS,
            tenant_claim: DEFAULT_TENANT_CLAIM.to_string(),
            permissions_claim: DEFAULT_PERMISSIONS_CLAIM.to_string(),
            system_admin_role: DEFAULT_SYSTEM_ADMIN_ROLE.to_string(),
        }
    }
}

/// Host-to-tenant resolution settings.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    pub platform_domain: String,
    pub reserved_subdomains: Vec<String>,
    pub domain_cache_ttl_secs: u64,
    pub domain_lookup_timeout_ms: u64,
    pub domain_verification_ttl_secs: u64,
    /// Where a pending domain must publish its verification token; `{domain}` is substituted.
    pub domain_challenge_url: String,
    /// Enables the `x-tenant-id` override when presented alongside this token.
    pub service_token: Option<String>,
}

impl TenancyConfig {
    pub fn domain_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.domain_cache_ttl_secs)
    }

    pub fn domain_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.domain_lookup_timeout_ms)
    }

    pub fn domain_verification_ttl(&self) -> Duration {
        Duration::from_secs(self.domain_verification_ttl_secs)
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            platform_domain: DEFAULT_PLATFORM_DOMAIN.to_string(),
            reserved_subdomains: DEFAULT_RESERVED_SUBDOMAINS
                .iter()
                .map(|value| value.to_string())
                .collect(),
            domain_cache_ttl_secs: DEFAULT_DOMAIN_CACHE_TTL_SECS,
            domain_lookup_timeout_ms: DEFAULT_DOMAIN_LOOKUP_TIMEOUT_MS,
            domain_verification_ttl_secs: DEFAULT_DOMAIN_VERIFICATION_TTL_SECS,
            domain_challenge_url: DEFAULT_DOMAIN_CHALLENGE_URL.to_string(),
            service_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthplaneConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub identity: IdentityConfig,
    pub tenancy: TenancyConfig,
    pub reconcile_on_start: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AuthplaneConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    provider_url: Option<String>,
    realm: Option<String>,
    jwks_url: Option<String>,
    audience: Option<String>,
    algorithm: Option<String>,
    leeway_secs: Option<u64>,
    jwks_ttl_secs: Option<u64>,
    jwks_fetch_timeout_ms: Option<u64>,
    jwks_min_refresh_interval_ms: Option<u64>,
    tenant_claim: Option<String>,
    permissions_claim: Option<String>,
    system_admin_role: Option<String>,
    platform_domain: Option<String>,
    reserved_subdomains: Option<Vec<String>>,
    domain_cache_ttl_secs: Option<u64>,
    domain_lookup_timeout_ms: Option<u64>,
    domain_verification_ttl_secs: Option<u64>,
    domain_challenge_url: Option<String>,
    service_token: Option<String>,
    reconcile_on_start: Option<bool>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_value(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parse {name}")),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("parse {name}: expected a boolean, got {other}"),
    }
}

/// Parse a token algorithm, allowing only asymmetric signatures.
pub fn parse_algorithm(raw: &str) -> Result<Algorithm> {
    let algorithm =
        Algorithm::from_str(raw).with_context(|| format!("unknown token algorithm {raw}"))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            bail!("token algorithm {raw} is symmetric; an asymmetric algorithm is required")
        }
        _ => Ok(algorithm),
    }
}

fn normalize_domain(value: &str) -> String {
    value.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl AuthplaneConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_value("TENANTRY_AP_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .with_context(|| "parse TENANTRY_AP_BIND")?;
        let metrics_bind = env_value("TENANTRY_AP_METRICS_BIND")
            .unwrap_or_else(|| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse TENANTRY_AP_METRICS_BIND")?;
        let storage = env_parse::<StorageBackend>("TENANTRY_AP_STORAGE")?
            .unwrap_or(StorageBackend::Memory);

        let postgres = match env_value("TENANTRY_AP_POSTGRES_URL") {
            Some(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("TENANTRY_AP_POSTGRES_MAX_CONNECTIONS")?.unwrap_or(10),
                connect_timeout_ms: env_parse("TENANTRY_AP_POSTGRES_CONNECT_TIMEOUT_MS")?
                    .unwrap_or(5_000),
                acquire_timeout_ms: env_parse("TENANTRY_AP_POSTGRES_ACQUIRE_TIMEOUT_MS")?
                    .unwrap_or(5_000),
            }),
            None => None,
        };

        let mut identity = IdentityConfig::default();
        if let Some(value) = env_value("TENANTRY_AP_PROVIDER_URL") {
            identity.provider_url = value;
        }
        if let Some(value) = env_value("TENANTRY_AP_REALM") {
            identity.realm = value;
        }
        identity.jwks_url = env_value("TENANTRY_AP_JWKS_URL");
        identity.audience = env_value("TENANTRY_AP_AUDIENCE");
        if let Some(value) = env_value("TENANTRY_AP_TOKEN_ALGORITHM") {
            identity.algorithm =
                parse_algorithm(&value).with_context(|| "parse TENANTRY_AP_TOKEN_ALGORITHM")?;
        }
        if let Some(value) = env_parse("TENANTRY_AP_LEEWAY_SECS")? {
            identity.leeway_secs = value;
        }
        if let Some(value) = env_parse("TENANTRY_AP_JWKS_TTL_SECS")? {
            identity.jwks_ttl_secs = value;
        }
        if let Some(value) = env_parse("TENANTRY_AP_JWKS_FETCH_TIMEOUT_MS")? {
            identity.jwks_fetch_timeout_ms = value;
        }
        if let Some(value) = env_parse("TENANTRY_AP_JWKS_MIN_REFRESH_INTERVAL_MS")? {
            identity.jwks_min_refresh_interval_ms = value;
        }
        if let Some(value) = env_value("TENANTRY_AP_TENANT_CLAIM") {
            identity.tenant_claim = value;
        }
        if let Some(value) = env_value("TENANTRY_AP_PERMISSIONS_CLAIM") {
            identity.permissions_claim = value;
        }
        if let Some(value) = env_value("TENANTRY_AP_SYSTEM_ADMIN_ROLE") {
            identity.system_admin_role = value;
        }

        let mut tenancy = TenancyConfig::default();
        if let Some(value) = env_value("TENANTRY_AP_PLATFORM_DOMAIN") {
            tenancy.platform_domain = normalize_domain(&value);
        }
        if let Some(value) = env_value("TENANTRY_AP_RESERVED_SUBDOMAINS") {
            tenancy.reserved_subdomains = value
                .split(',')
                .map(normalize_domain)
                .filter(|label| !label.is_empty())
                .collect();
        }
        if let Some(value) = env_parse("TENANTRY_AP_DOMAIN_CACHE_TTL_SECS")? {
            tenancy.domain_cache_ttl_secs = value;
        }
        if let Some(value) = env_parse("TENANTRY_AP_DOMAIN_LOOKUP_TIMEOUT_MS")? {
            tenancy.domain_lookup_timeout_ms = value;
        }
        if let Some(value) = env_parse("TENANTRY_AP_DOMAIN_VERIFICATION_TTL_SECS")? {
            tenancy.domain_verification_ttl_secs = value;
        }
        if let Some(value) = env_value("TENANTRY_AP_DOMAIN_CHALLENGE_URL") {
            tenancy.domain_challenge_url = value;
        }
        tenancy.service_token = env_value("TENANTRY_AP_SERVICE_TOKEN");

        let reconcile_on_start = match env_value("TENANTRY_AP_RECONCILE_ON_START") {
            Some(raw) => parse_bool("TENANTRY_AP_RECONCILE_ON_START", &raw)?,
            None => true,
        };

        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            identity,
            tenancy,
            reconcile_on_start,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("TENANTRY_AP_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read TENANTRY_AP_CONFIG: {path}"))?;
            let override_cfg: AuthplaneConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse authplane config yaml")?;
            config.apply_override(override_cfg)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_override(&mut self, o: AuthplaneConfigOverride) -> Result<()> {
        if let Some(value) = o.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = o.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = o.storage {
            self.storage = value;
        }
        if let Some(value) = o.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = o.provider_url {
            self.identity.provider_url = value;
        }
        if let Some(value) = o.realm {
            self.identity.realm = value;
        }
        if let Some(value) = o.jwks_url {
            self.identity.jwks_url = Some(value);
        }
        if let Some(value) = o.audience {
            self.identity.audience = Some(value);
        }
        if let Some(value) = o.algorithm {
            self.identity.algorithm = parse_algorithm(&value).with_context(|| "parse algorithm")?;
        }
        if let Some(value) = o.leeway_secs {
            self.identity.leeway_secs = value;
        }
        if let Some(value) = o.jwks_ttl_secs {
            self.identity.jwks_ttl_secs = value;
        }
        if let Some(value) = o.jwks_fetch_timeout_ms {
            self.identity.jwks_fetch_timeout_ms = value;
        }
        if let Some(value) = o.jwks_min_refresh_interval_ms {
            self.identity.jwks_min_refresh_interval_ms = value;
        }
        if let Some(value) = o.tenant_claim {
            self.identity.tenant_claim = value;
        }
        if let Some(value) = o.permissions_claim {
            self.identity.permissions_claim = value;
        }
        if let Some(value) = o.system_admin_role {
            self.identity.system_admin_role = value;
        }
        if let Some(value) = o.platform_domain {
            self.tenancy.platform_domain = normalize_domain(&value);
        }
        if let Some(value) = o.reserved_subdomains {
            self.tenancy.reserved_subdomains =
                value.iter().map(|label| normalize_domain(label)).collect();
        }
        if let Some(value) = o.domain_cache_ttl_secs {
            self.tenancy.domain_cache_ttl_secs = value;
        }
        if let Some(value) = o.domain_lookup_timeout_ms {
            self.tenancy.domain_lookup_timeout_ms = value;
        }
        if let Some(value) = o.domain_verification_ttl_secs {
            self.tenancy.domain_verification_ttl_secs = value;
        }
        if let Some(value) = o.domain_challenge_url {
            self.tenancy.domain_challenge_url = value;
        }
        if let Some(value) = o.service_token {
            self.tenancy.service_token = Some(value);
        }
        if let Some(value) = o.reconcile_on_start {
            self.reconcile_on_start = value;
        }
        Ok(())
    }

    /// Reject combinations that cannot serve traffic.
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("storage backend postgres requires TENANTRY_AP_POSTGRES_URL or a postgres section");
        }
        if self.tenancy.platform_domain.is_empty() {
            bail!("platform domain must not be empty");
        }
        if self.identity.jwks_fetch_timeout_ms == 0 || self.tenancy.domain_lookup_timeout_ms == 0 {
            bail!("upstream timeouts must be positive");
        }
        if !self.tenancy.domain_challenge_url.contains("{domain}") {
            bail!("domain challenge url must contain a {{domain}} placeholder");
        }
        Ok(())
    }
}
