//! Identity provider signing-key cache.
//!
//! # Purpose
//! Holds the provider's published key set so token validation only touches the network when
//! the set is stale or lacks a requested key id.
//!
//! # Key invariants
//! - Within the TTL, lookups for known key ids never perform a fetch.
//! - A missing key id triggers exactly one coalesced refetch; if it is still missing the
//!   lookup fails with [`AuthError::UnknownKey`].
//! - Refetches forced by missing key ids are spaced at least `min_refresh_interval` apart;
//!   inside that window an unknown key id fails without touching the network.
//! - Fetches run on a spawned task, so a request cancelled mid-fetch still fills the cache.
//! - A failed fetch leaves the previous key set in place.
//!
//! # Security
//! Keys whose parameters cannot back the configured algorithm are never used for
//! verification.
use crate::auth::error::AuthError;
use crate::observability::JWKS_REFRESH_TOTAL;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tenantry_authz::TtlCache;

/// One verified-usable key from the provider's key set.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    jwk: Jwk,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether this key may verify tokens signed with `alg`.
    pub fn supports(&self, alg: Algorithm) -> bool {
        if let Some(key_alg) = self.jwk.common.key_algorithm
            && !key_algorithm_matches(key_alg, alg)
        {
            return false;
        }
        matches!(
            (&self.jwk.algorithm, alg),
            (
                AlgorithmParameters::RSA(_),
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) | (
                AlgorithmParameters::EllipticCurve(_),
                Algorithm::ES256 | Algorithm::ES384
            ) | (AlgorithmParameters::OctetKeyPair(_), Algorithm::EdDSA)
        )
    }
}

fn key_algorithm_matches(key_alg: KeyAlgorithm, alg: Algorithm) -> bool {
    matches!(
        (key_alg, alg),
        (KeyAlgorithm::RS256, Algorithm::RS256)
            | (KeyAlgorithm::RS384, Algorithm::RS384)
            | (KeyAlgorithm::RS512, Algorithm::RS512)
            | (KeyAlgorithm::PS256, Algorithm::PS256)
            | (KeyAlgorithm::PS384, Algorithm::PS384)
            | (KeyAlgorithm::PS512, Algorithm::PS512)
            | (KeyAlgorithm::ES256, Algorithm::ES256)
            | (KeyAlgorithm::ES384, Algorithm::ES384)
            | (KeyAlgorithm::EdDSA, Algorithm::EdDSA)
    )
}

/// Key set indexed by key id.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
}

impl KeySet {
    /// Index a JWKS document, skipping keys without a `kid` or with unusable parameters.
    pub fn from_jwks(jwks: JwkSet) -> Self {
        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                tracing::debug!("skipping jwk without kid");
                continue;
            };
            match DecodingKey::from_jwk(&jwk) {
                Ok(decoding_key) => {
                    keys.insert(
                        kid.clone(),
                        Arc::new(SigningKey {
                            kid,
                            jwk,
                            decoding_key,
                        }),
                    );
                }
                Err(err) => tracing::warn!(kid = %kid, error = %err, "skipping unusable jwk"),
            }
        }
        Self { keys }
    }

    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

struct KeyCacheInner {
    client: reqwest::Client,
    jwks_url: String,
    fetch_timeout: Duration,
    cache: TtlCache<String, Arc<KeySet>>,
    min_refresh_interval: Duration,
    started: Instant,
    // Milliseconds after `started` of the last forced refetch, offset by one; zero means never.
    last_forced: AtomicU64,
}

#[derive(Clone, Copy)]
enum Refresh {
    IfStale,
    Force,
}

impl KeyCacheInner {
    /// Claim the right to force a refetch now.
    ///
    /// Fails while the previous forced refetch is younger than `min_refresh_interval`,
    /// or when a concurrent caller claimed it first.
    fn claim_forced_refresh(&self) -> bool {
        let now = u64::try_from(self.started.elapsed().as_millis())
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let interval = u64::try_from(self.min_refresh_interval.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_forced.load(Ordering::SeqCst);
        if last != 0 && now.saturating_sub(last) < interval {
            return false;
        }
        self.last_forced
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn refresh(&self, mode: Refresh) -> Result<Arc<KeySet>, AuthError> {
        let fetch = || self.fetch();
        match mode {
            Refresh::IfStale => self.cache.get_or_refresh(&self.jwks_url, fetch).await,
            Refresh::Force => self.cache.force_refresh(&self.jwks_url, fetch).await,
        }
    }

    async fn fetch(&self) -> Result<Arc<KeySet>, AuthError> {
        let request = async {
            self.client
                .get(&self.jwks_url)
                .send()
                .await?
                .error_for_status()?
                .json::<JwkSet>()
                .await
        };
        let result = match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(Ok(jwks)) => Ok(Arc::new(KeySet::from_jwks(jwks))),
            Ok(Err(err)) => Err(AuthError::UpstreamUnavailable(format!("jwks fetch: {err}"))),
            Err(_) => Err(AuthError::UpstreamUnavailable("jwks fetch timed out".into())),
        };
        match &result {
            Ok(keys) => {
                metrics::counter!(JWKS_REFRESH_TOTAL, "outcome" => "ok").increment(1);
                tracing::info!(keys = keys.len(), "refreshed identity provider keys");
            }
            Err(err) => {
                metrics::counter!(JWKS_REFRESH_TOTAL, "outcome" => "error").increment(1);
                tracing::warn!(error = %err, "identity provider key refresh failed");
            }
        }
        result
    }
}

/// TTL-bounded cache of the identity provider's signing keys.
///
/// # Examples
/// ```rust,no_run
/// use authplane::auth::keys::KeyMaterialCache;
/// use std::time::Duration;
///
/// async fn lookup(cache: KeyMaterialCache) {
///     let _ = cache.get_signing_key("kid-1").await;
/// }
/// let _ = KeyMaterialCache::new(
///     "https://idp.example/realms/main/protocol/openid-connect/certs",
///     Duration::from_secs(300),
///     Duration::from_secs(3),
///     Duration::from_secs(10),
/// );
/// ```
#[derive(Clone)]
pub struct KeyMaterialCache {
    inner: Arc<KeyCacheInner>,
}

impl KeyMaterialCache {
    pub fn new(
        jwks_url: impl Into<String>,
        ttl: Duration,
        fetch_timeout: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(KeyCacheInner {
                client: reqwest::Client::new(),
                jwks_url: jwks_url.into(),
                fetch_timeout,
                cache: TtlCache::with_capacity(ttl, 1),
                min_refresh_interval,
                started: Instant::now(),
                last_forced: AtomicU64::new(0),
            }),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.inner.jwks_url
    }

    /// Return the key for `kid`, refetching the key set when stale or when `kid` is unknown.
    ///
    /// # Errors
    /// - [`AuthError::UpstreamUnavailable`] if a needed fetch fails or times out.
    /// - [`AuthError::UnknownKey`] if `kid` is absent from a freshly fetched set, or if it is
    ///   absent and a forced refetch already ran within the minimum refresh interval.
    pub async fn get_signing_key(&self, kid: &str) -> Result<Arc<SigningKey>, AuthError> {
        if let Some(keys) = self.inner.cache.get(&self.inner.jwks_url) {
            if let Some(key) = keys.get(kid) {
                return Ok(key);
            }
            if !self.inner.claim_forced_refresh() {
                // A recent or in-flight forced refetch may already carry the key.
                return self
                    .inner
                    .cache
                    .settled(&self.inner.jwks_url)
                    .await
                    .and_then(|keys| keys.get(kid))
                    .ok_or_else(|| {
                        metrics::counter!(JWKS_REFRESH_TOTAL, "outcome" => "throttled")
                            .increment(1);
                        tracing::debug!(kid, "unknown key id inside refresh interval");
                        AuthError::UnknownKey
                    });
            }
            // Rotation: the cached set predates the signing key.
            let refreshed = self.refetch(Refresh::Force).await?;
            return refreshed.get(kid).ok_or(AuthError::UnknownKey);
        }
        let keys = self.refetch(Refresh::IfStale).await?;
        keys.get(kid).ok_or(AuthError::UnknownKey)
    }

    /// Drop the cached key set so the next lookup fetches.
    pub fn invalidate(&self) {
        self.inner.cache.invalidate(&self.inner.jwks_url);
    }

    async fn refetch(&self, mode: Refresh) -> Result<Arc<KeySet>, AuthError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refresh(mode).await })
            .await
            .map_err(|err| AuthError::UpstreamUnavailable(format!("jwks refresh task: {err}")))?
    }
}
