//! Proof that a tenant controls a custom domain.
//!
//! # Purpose
//! Fetches the verification document a pending domain is expected to publish at the
//! configured challenge URL, so verification depends on control of the host rather than
//! on knowledge of the token.
//!
//! # Key invariants
//! - Redirects are never followed; the answer must come from the claimed host itself.
//! - Fetches are bounded by the domain lookup timeout and by [`MAX_CHALLENGE_BYTES`].
use crate::config::TenancyConfig;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on the body read from a challenge URL.
pub const MAX_CHALLENGE_BYTES: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("challenge url unreachable: {0}")]
    Unreachable(String),
    #[error("challenge url answered {0}")]
    Status(u16),
    #[error("challenge fetch timed out")]
    TimedOut,
    #[error("challenge document exceeds {MAX_CHALLENGE_BYTES} bytes")]
    TooLarge,
}

#[derive(Clone)]
pub struct DomainChallenge {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl DomainChallenge {
    /// # Errors
    /// - Fails if the HTTP client cannot be constructed.
    pub fn new(config: &TenancyConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            url_template: config.domain_challenge_url.clone(),
            timeout: config.domain_lookup_timeout(),
        })
    }

    pub fn url_for(&self, domain: &str) -> String {
        self.url_template.replace("{domain}", domain)
    }

    /// Return the trimmed document published for `domain`.
    ///
    /// # Errors
    /// - [`ChallengeError::Status`] for any non-2xx answer, redirects included.
    /// - [`ChallengeError::Unreachable`], [`ChallengeError::TimedOut`] or
    ///   [`ChallengeError::TooLarge`] when no usable document was read.
    pub async fn published_token(&self, domain: &str) -> Result<String, ChallengeError> {
        let url = self.url_for(domain);
        match tokio::time::timeout(self.timeout, self.fetch(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ChallengeError::TimedOut),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ChallengeError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ChallengeError::Unreachable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChallengeError::Status(status.as_u16()));
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| ChallengeError::Unreachable(err.to_string()))?
        {
            if body.len() + chunk.len() > MAX_CHALLENGE_BYTES {
                return Err(ChallengeError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::get;

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn challenge(base: &str) -> DomainChallenge {
        let config = TenancyConfig {
            domain_challenge_url: format!("{base}/challenge/{{domain}}"),
            domain_lookup_timeout_ms: 500,
            ..TenancyConfig::default()
        };
        DomainChallenge::new(&config).expect("client")
    }

    #[tokio::test]
    async fn published_document_is_trimmed() {
        let base = serve(axum::Router::new().route(
            "/challenge/app.example.com",
            get(|| async { "  abc123\n" }),
        ))
        .await;
        let challenge = challenge(&base);
        assert_eq!(
            challenge.url_for("app.example.com"),
            format!("{base}/challenge/app.example.com")
        );
        assert_eq!(
            challenge.published_token("app.example.com").await,
            Ok("abc123".to_string())
        );
    }

    #[tokio::test]
    async fn redirects_and_errors_are_not_accepted() {
        let base = serve(
            axum::Router::new()
                .route(
                    "/challenge/moved.example.com",
                    get(|| async {
                        (
                            StatusCode::FOUND,
                            [(header::LOCATION, "/challenge/app.example.com")],
                        )
                            .into_response()
                    }),
                )
                .route("/challenge/app.example.com", get(|| async { "abc123" }))
                .route(
                    "/challenge/big.example.com",
                    get(|| async { "x".repeat(MAX_CHALLENGE_BYTES + 1) }),
                ),
        )
        .await;
        let challenge = challenge(&base);
        assert_eq!(
            challenge.published_token("moved.example.com").await,
            Err(ChallengeError::Status(302))
        );
        assert_eq!(
            challenge.published_token("absent.example.com").await,
            Err(ChallengeError::Status(404))
        );
        assert_eq!(
            challenge.published_token("big.example.com").await,
            Err(ChallengeError::TooLarge)
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let challenge = challenge(&format!("http://{addr}"));
        assert!(matches!(
            challenge.published_token("app.example.com").await,
            Err(ChallengeError::Unreachable(_) | ChallengeError::TimedOut)
        ));
    }
}
