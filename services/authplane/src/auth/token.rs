//! Bearer token validation against the identity provider's published keys.
//!
//! # Purpose
//! Turns an `Authorization` header value into verified [`TokenClaims`].
//!
//! # Key invariants
//! - The header algorithm must equal the configured asymmetric algorithm before any key
//!   lookup happens.
//! - Signature, `exp`, `nbf` and `iss` are verified before any custom claim is read.
//! - The permission-map claim is decoded for diagnostics only; authorization never reads it.
//!
//! # Security
//! Error values never carry token contents; only the jsonwebtoken error kind is kept for
//! malformed input.
use crate::auth::error::AuthError;
use crate::auth::keys::KeyMaterialCache;
use crate::config::IdentityConfig;
use crate::observability::TOKEN_VALIDATION_TOTAL;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tenantry_authz::{TenantId, TokenClaims};

#[derive(Clone)]
pub struct TokenValidator {
    keys: KeyMaterialCache,
    issuer: String,
    audience: Option<String>,
    algorithm: Algorithm,
    leeway_secs: u64,
    tenant_claim: String,
    permissions_claim: String,
}

/// Strip a case-insensitive `Bearer` scheme. Returns `None` for other schemes or an empty token.
pub fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl TokenValidator {
    pub fn new(config: &IdentityConfig, keys: KeyMaterialCache) -> Self {
        Self {
            keys,
            issuer: config.issuer(),
            audience: config.audience.clone(),
            algorithm: config.algorithm,
            leeway_secs: config.leeway_secs,
            tenant_claim: config.tenant_claim.clone(),
            permissions_claim: config.permissions_claim.clone(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Validate an `Authorization` header value.
    ///
    /// # Errors
    /// - [`AuthError::Malformed`] for a missing scheme, unparsable header, missing `kid`,
    ///   missing `sub`, or an undecodable permission map.
    /// - [`AuthError::UnsupportedAlgorithm`] when the header algorithm is not the configured one.
    /// - [`AuthError::UnknownKey`] / [`AuthError::UpstreamUnavailable`] from key lookup.
    /// - [`AuthError::ExpiredToken`], [`AuthError::NotYetValid`],
    ///   [`AuthError::InvalidSignature`], [`AuthError::IssuerMismatch`],
    ///   [`AuthError::AudienceMismatch`] from verification.
    pub async fn validate(&self, authorization: &str) -> Result<TokenClaims, AuthError> {
        let result = self.validate_inner(authorization).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        };
        metrics::counter!(TOKEN_VALIDATION_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn validate_inner(&self, authorization: &str) -> Result<TokenClaims, AuthError> {
        let token = strip_bearer(authorization)
            .ok_or_else(|| AuthError::Malformed("expected bearer token".into()))?;
        let header =
            decode_header(token).map_err(|err| AuthError::Malformed(err.to_string()))?;
        if header.alg != self.algorithm {
            return Err(AuthError::UnsupportedAlgorithm);
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::Malformed("missing kid".into()))?;

        let key = self.keys.get_signing_key(kid).await?;
        if !key.supports(header.alg) {
            tracing::warn!(kid = %kid, "signing key does not match token algorithm");
            return Err(AuthError::InvalidSignature);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation
            .required_spec_claims
            .extend(["iss".to_string(), "sub".to_string()]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Value>(token, key.decoding_key(), &validation)?;
        parse_claims(&data.claims, &self.tenant_claim, &self.permissions_claim)
    }
}

/// Extract [`TokenClaims`] from a verified claim set.
pub fn parse_claims(
    claims: &Value,
    tenant_claim: &str,
    permissions_claim: &str,
) -> Result<TokenClaims, AuthError> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|sub| !sub.is_empty())
        .ok_or_else(|| AuthError::Malformed("missing sub".into()))?
        .to_string();
    let issuer = claims
        .get("iss")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let expires_at = claims.get("exp").and_then(Value::as_i64).unwrap_or_default();

    let realm_roles = claims
        .get("realm_access")
        .map(roles_of)
        .unwrap_or_default();
    let client_roles: BTreeMap<String, BTreeSet<String>> = claims
        .get("resource_access")
        .and_then(Value::as_object)
        .map(|clients| {
            clients
                .iter()
                .map(|(client, access)| (client.clone(), roles_of(access)))
                .collect()
        })
        .unwrap_or_default();
    let tenant_id = claims
        .get(tenant_claim)
        .and_then(Value::as_str)
        .filter(|tenant| !tenant.is_empty())
        .map(TenantId::new);
    let permissions = parse_permission_map(claims.get(permissions_claim))?;

    Ok(TokenClaims {
        subject,
        issuer,
        expires_at,
        realm_roles,
        client_roles,
        tenant_id,
        permissions,
    })
}

fn roles_of(access: &Value) -> BTreeSet<String> {
    access
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Decode `{ "perm": bool }` given either inline or as a JSON-encoded string.
fn parse_permission_map(value: Option<&Value>) -> Result<BTreeSet<String>, AuthError> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Object(map)) => Ok(granted(map)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(BTreeSet::new()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(granted(&map)),
            _ => Err(AuthError::Malformed("permission claim is not an object".into())),
        },
        Some(_) => Err(AuthError::Malformed("permission claim is not an object".into())),
    }
}

fn granted(map: &Map<String, Value>) -> BTreeSet<String> {
    map.iter()
        .filter(|(_, value)| value.as_bool() == Some(true))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(strip_bearer("Bearer abc"), Some("abc"));
        assert_eq!(strip_bearer("bearer  abc "), Some("abc"));
        assert_eq!(strip_bearer("Basic abc"), None);
        assert_eq!(strip_bearer("Bearer "), None);
        assert_eq!(strip_bearer("abc"), None);
    }

    #[test]
    fn claims_capture_roles_and_tenant() {
        let claims = parse_claims(
            &json!({
                "sub": "u1",
                "iss": "https://idp/realms/main",
                "exp": 100,
                "realm_access": {"roles": ["system-admin", 7]},
                "resource_access": {"web": {"roles": ["editor"]}},
                "tenant_id": "acme",
            }),
            "tenant_id",
            "tenant_permissions",
        )
        .expect("claims");
        assert_eq!(claims.subject, "u1");
        assert!(claims.has_realm_role("system-admin"));
        assert_eq!(claims.realm_roles.len(), 1);
        assert!(claims.has_client_role("web", "editor"));
        assert_eq!(claims.tenant_id, Some(TenantId::new("acme")));
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn missing_subject_is_malformed() {
        let err = parse_claims(&json!({"iss": "x"}), "tenant_id", "p").unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[test]
    fn permission_map_accepts_object_or_encoded_string() {
        let inline = parse_permission_map(Some(&json!({"users:read": true, "users:manage": false})))
            .expect("inline");
        assert_eq!(inline, BTreeSet::from(["users:read".to_string()]));

        let encoded = parse_permission_map(Some(&json!("{\"roles:read\": true}"))).expect("encoded");
        assert_eq!(encoded, BTreeSet::from(["roles:read".to_string()]));

        for empty in [json!(null), json!(""), json!({}), json!("{}")] {
            assert!(parse_permission_map(Some(&empty)).expect("empty").is_empty());
        }
        assert!(parse_permission_map(None).expect("absent").is_empty());
    }

    #[test]
    fn permission_map_rejects_non_objects() {
        for bad in [json!("not json"), json!("[1,2]"), json!(["users:read"]), json!(3)] {
            assert!(matches!(
                parse_permission_map(Some(&bad)),
                Err(AuthError::Malformed(_))
            ));
        }
    }
}
