//! Tokens issued by an external OAuth2 authorization server.
//!
//! Validation is an RFC 7662 introspection call authenticated with the
//! client's credentials. At most `max_concurrent` calls are in flight; a call
//! that cannot get a permit and an answer within `timeout_ms` counts as
//! inactive. So does every transport, status or parse failure.
//!
//! Revocation uses the RFC 7009 endpoint when one is configured.

use super::{Token, TokenError, Validation, SCOPE_ATTRIBUTE};
use crate::clock::SharedClock;
use crate::config::IntrospectionConfig;
use crate::metrics;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Introspection response fields we read. Everything else is ignored.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    sub: Option<String>,
    username: Option<String>,
    exp: Option<i64>,
    scope: Option<String>,
    client_id: Option<String>,
    token_type: Option<String>,
}

pub struct IntrospectionTokenStore {
    http: reqwest::Client,
    endpoint: String,
    revocation_endpoint: Option<String>,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    permits: Arc<Semaphore>,
    clock: SharedClock,
}

impl IntrospectionTokenStore {
    pub fn new(config: &IntrospectionConfig, clock: SharedClock) -> Result<Self, TokenError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("natter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TokenError::Upstream(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            revocation_endpoint: config.revocation_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            timeout,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            clock,
        })
    }

    pub(super) async fn inspect(&self, id: &str) -> Validation {
        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.introspect(id)).await;
        metrics::observe_introspection(started.elapsed().as_secs_f64());

        match response {
            Ok(Ok(body)) => self.map_response(body),
            Ok(Err(e)) => {
                warn!(error = %e, "token introspection failed");
                Validation::Invalid
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "token introspection timed out"
                );
                Validation::Invalid
            }
        }
    }

    async fn introspect(&self, id: &str) -> Result<IntrospectionResponse, TokenError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TokenError::Upstream(e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("token", id), ("token_type_hint", "access_token")])
            .send()
            .await
            .map_err(|e| TokenError::Upstream(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(TokenError::Upstream(format!("status {}", response.status())));
        }
        response
            .json::<IntrospectionResponse>()
            .await
            .map_err(|e| TokenError::Upstream(e.without_url().to_string()))
    }

    fn map_response(&self, body: IntrospectionResponse) -> Validation {
        if !body.active {
            debug!(reason = "inactive", "introspected token rejected");
            return Validation::Invalid;
        }
        if let Some(kind) = &body.token_type
            && !kind.eq_ignore_ascii_case("access_token")
            && !kind.eq_ignore_ascii_case("bearer")
        {
            debug!(token_type = %kind, reason = "wrong_token_type", "introspected token rejected");
            return Validation::Invalid;
        }

        let Some(subject) = body.sub.or(body.username) else {
            debug!(reason = "no_subject", "introspected token rejected");
            return Validation::Invalid;
        };
        let Some(expiry) = body.exp.and_then(|exp| chrono::DateTime::from_timestamp(exp, 0)) else {
            debug!(reason = "no_expiry", "introspected token rejected");
            return Validation::Invalid;
        };

        let mut token = Token::new(subject, expiry);
        if let Some(scope) = body.scope {
            token.attributes.insert(SCOPE_ATTRIBUTE.to_string(), scope);
        }
        if let Some(client_id) = body.client_id {
            token.attributes.insert("client_id".to_string(), client_id);
        }
        Validation::check_expiry(token, self.clock.now())
    }

    pub(super) async fn revoke(&self, id: &str) -> Result<(), TokenError> {
        let Some(endpoint) = &self.revocation_endpoint else {
            return Err(TokenError::Unsupported("revoke"));
        };

        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| TokenError::Upstream(e.to_string()))?;
            self.http
                .post(endpoint)
                .basic_auth(&self.client_id, Some(&self.client_secret))
                .form(&[("token", id), ("token_type_hint", "access_token")])
                .send()
                .await
                .map_err(|e| TokenError::Upstream(e.without_url().to_string()))
        };
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| TokenError::Upstream("revocation timed out".to_string()))??;

        // RFC 7009: 200 for both known and unknown tokens.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TokenError::Upstream(format!("status {}", response.status())))
        }
    }
}
