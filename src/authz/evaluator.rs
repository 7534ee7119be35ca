//! Per-request authorization state machine.
//!
//! ```text
//! Unauthenticated -> TokenPresented -> TokenValidated -> ScopeChecked
//!                 -> PermissionChecked -> Authorized
//! ```
//!
//! Any step may end in a [`Denied`] instead, which records the last stage
//! reached. A bearer token and a capability are checked independently when
//! both are presented, and both must pass. Capabilities skip the scope step;
//! their embedded permissions stand in for the stored row.

use super::scope::ScopeSet;
use super::Permissions;
use crate::caps::{CapabilityController, CapabilityGrant};
use crate::config::PermissionModel;
use crate::db::{Database, DbError};
use crate::metrics;
use crate::token::{Token, TokenContext, TokenStore, Validation};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Where a request is in the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unauthenticated,
    TokenPresented,
    TokenValidated,
    ScopeChecked,
    PermissionChecked,
    Authorized,
}

fn advance(stage: &mut Stage, next: Stage) {
    trace!(from = ?*stage, to = ?next, "authz transition");
    *stage = next;
}

/// Why a request was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    Expired,
    #[error("insufficient scope: {0} required")]
    InsufficientScope(&'static str),
    #[error("insufficient permission: {0:?} missing")]
    InsufficientPermission(Permissions),
    #[error("invalid capability")]
    InvalidCapability,
    #[error("permission lookup failed: {0}")]
    Lookup(#[from] DbError),
}

impl Rejection {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "expired",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::InsufficientPermission(_) => "insufficient_permission",
            Self::InvalidCapability => "invalid_capability",
            Self::Lookup(_) => "lookup_failed",
        }
    }
}

/// A rejection and the last stage the request reached before it.
#[derive(Debug, Error)]
#[error("{reason} (after {reached:?})")]
pub struct Denied {
    pub reached: Stage,
    #[source]
    pub reason: Rejection,
}

/// The raw credentials a request carries.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `Authorization: Bearer` value.
    pub bearer: Option<String>,
    /// `access_token` query value.
    pub capability: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.bearer.is_none() && self.capability.is_none()
    }
}

/// What a route demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requirement {
    /// Scope a bearer token must carry.
    pub scope: Option<&'static str>,
    /// Permission bits needed on `space_id`.
    pub permissions: Permissions,
    pub space_id: Option<i64>,
}

impl Requirement {
    /// Any valid credential will do.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn scope(scope: &'static str) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_space(mut self, space_id: i64, permissions: Permissions) -> Self {
        self.space_id = Some(space_id);
        self.permissions = permissions;
        self
    }
}

/// What the evaluator learned, for the handler.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Token subject. Capability-only requests have none.
    pub subject: Option<String>,
    pub scope: Option<ScopeSet>,
    /// Effective permissions on the required space: the intersection of every
    /// presented source.
    pub perms: Permissions,
    pub token: Option<Token>,
    pub capability: Option<CapabilityGrant>,
}

impl fmt::Display for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.subject, &self.capability) {
            (Some(subject), _) => write!(f, "subject={subject}"),
            (None, Some(grant)) => write!(f, "capability={}", grant.path()),
            (None, None) => f.write_str("anonymous"),
        }
    }
}

/// Borrowed view over the components a decision needs.
pub struct Evaluator<'a> {
    tokens: &'a TokenStore,
    caps: &'a CapabilityController,
    db: &'a Database,
    model: PermissionModel,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        tokens: &'a TokenStore,
        caps: &'a CapabilityController,
        db: &'a Database,
        model: PermissionModel,
    ) -> Self {
        Self {
            tokens,
            caps,
            db,
            model,
        }
    }

    pub async fn evaluate(
        &self,
        ctx: &TokenContext,
        credentials: &Credentials,
        requirement: &Requirement,
    ) -> Result<AuthContext, Denied> {
        let mut stage = Stage::Unauthenticated;
        let result = self.run(&mut stage, ctx, credentials, requirement).await;

        match &result {
            Ok(auth) => {
                metrics::record_authz_decision("authorized");
                trace!(method = %ctx.method, path = %ctx.path, %auth, "request authorized");
            }
            Err(reason) => {
                metrics::record_authz_decision(reason.label());
                debug!(
                    method = %ctx.method,
                    path = %ctx.path,
                    reached = ?stage,
                    reason = reason.label(),
                    "request rejected"
                );
            }
        }
        result.map_err(|reason| Denied {
            reached: stage,
            reason,
        })
    }

    async fn run(
        &self,
        stage: &mut Stage,
        ctx: &TokenContext,
        credentials: &Credentials,
        requirement: &Requirement,
    ) -> Result<AuthContext, Rejection> {
        if credentials.is_empty() {
            return Err(Rejection::Unauthenticated);
        }
        advance(stage, Stage::TokenPresented);

        let mut auth = AuthContext::default();
        if let Some(bearer) = &credentials.bearer {
            let token = match self.tokens.inspect(ctx, bearer).await {
                Validation::Active(token) => token,
                Validation::Expired => return Err(Rejection::Expired),
                Validation::Invalid => return Err(Rejection::InvalidToken),
            };
            auth.subject = Some(token.subject.clone());
            auth.scope = token.scope().map(ScopeSet::parse);
            auth.token = Some(token);
        }
        if let Some(presented) = &credentials.capability {
            let grant = self
                .caps
                .verify(presented, &ctx.path)
                .ok_or(Rejection::InvalidCapability)?;
            auth.capability = Some(grant);
        }
        advance(stage, Stage::TokenValidated);

        // Scopes bind tokens only.
        if auth.token.is_some()
            && let Some(required) = requirement.scope
            && !auth.scope.as_ref().is_some_and(|s| s.contains(required))
        {
            return Err(Rejection::InsufficientScope(required));
        }
        advance(stage, Stage::ScopeChecked);

        auth.perms = self.effective_permissions(&auth, requirement).await?;
        let missing = auth.perms.missing(requirement.permissions);
        if !missing.is_empty() {
            return Err(Rejection::InsufficientPermission(missing));
        }
        advance(stage, Stage::PermissionChecked);
        advance(stage, Stage::Authorized);
        Ok(auth)
    }

    /// Intersection of the stored row (for a token subject) and the
    /// capability's grant (if any).
    async fn effective_permissions(
        &self,
        auth: &AuthContext,
        requirement: &Requirement,
    ) -> Result<Permissions, Rejection> {
        let Some(space_id) = requirement.space_id else {
            return Ok(Permissions::NONE);
        };

        let mut perms = Permissions::ALL;
        if let Some(subject) = &auth.subject {
            let stored = self
                .db
                .permissions()
                .lookup(self.model, space_id, subject)
                .await?;
            perms = perms.intersect(stored);
        }
        if let Some(grant) = &auth.capability {
            perms = perms.intersect(grant.perms());
        }
        Ok(perms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{Role, scope};
    use crate::clock::{Clock, ManualClock};
    use crate::config::CapabilityConfig;
    use crate::keys::test_ring;
    use crate::token::{DatabaseTokenStore, HmacTokenStore, SCOPE_ATTRIBUTE};
    use chrono::Duration;
    use http::Method;
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<ManualClock>,
        db: Database,
        tokens: TokenStore,
        caps: CapabilityController,
        space_id: i64,
    }

    impl Fixture {
        async fn new(model: PermissionModel) -> Self {
            let clock = ManualClock::starting_now();
            let db = Database::new(":memory:").await.unwrap();
            let tokens = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
            let caps = CapabilityController::new(
                &test_ring(),
                "https://natter.local",
                &CapabilityConfig::default(),
                clock.clone(),
            );
            let space = db.spaces().create("general", "owner", model).await.unwrap();
            Self {
                clock,
                db,
                tokens,
                caps,
                space_id: space.space_id,
            }
        }

        fn evaluator(&self, model: PermissionModel) -> Evaluator<'_> {
            Evaluator::new(&self.tokens, &self.caps, &self.db, model)
        }

        async fn bearer(&self, subject: &str, scope: &str) -> Credentials {
            let token = Token::new(subject, self.clock.now() + Duration::minutes(10))
                .with_attribute(SCOPE_ATTRIBUTE, scope);
            let id = self.tokens.create(&ctx(Method::POST, "/sessions"), &token).await.unwrap();
            Credentials {
                bearer: Some(id),
                capability: None,
            }
        }

        fn messages_path(&self) -> String {
            format!("/spaces/{}/messages", self.space_id)
        }
    }

    fn ctx(method: Method, path: &str) -> TokenContext {
        TokenContext::new(method, path)
    }

    #[tokio::test]
    async fn observer_can_read_but_not_post() {
        let f = Fixture::new(PermissionModel::Roles).await;
        f.db.permissions()
            .assign_role(f.space_id, "alice", Role::Observer)
            .await
            .unwrap();
        let creds = f.bearer("alice", "post_message list_messages").await;
        let eval = f.evaluator(PermissionModel::Roles);
        let path = f.messages_path();

        let post = Requirement::scope(scope::POST_MESSAGE).on_space(f.space_id, Permissions::WRITE);
        let denied = eval
            .evaluate(&ctx(Method::POST, &path), &creds, &post)
            .await
            .unwrap_err();
        assert!(matches!(
            denied.reason,
            Rejection::InsufficientPermission(p) if p == Permissions::WRITE
        ));
        assert_eq!(denied.reached, Stage::ScopeChecked);

        let list = Requirement::scope(scope::LIST_MESSAGES).on_space(f.space_id, Permissions::READ);
        let auth = eval
            .evaluate(&ctx(Method::GET, &path), &creds, &list)
            .await
            .unwrap();
        assert_eq!(auth.subject.as_deref(), Some("alice"));
        assert_eq!(auth.perms, Permissions::READ);
    }

    #[tokio::test]
    async fn missing_scope_is_rejected_before_permissions() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let creds = f.bearer("owner", "read_message").await;
        let req = Requirement::scope(scope::POST_MESSAGE).on_space(f.space_id, Permissions::WRITE);
        let denied = f
            .evaluator(PermissionModel::Acl)
            .evaluate(&ctx(Method::POST, &f.messages_path()), &creds, &req)
            .await
            .unwrap_err();
        assert!(matches!(denied.reason, Rejection::InsufficientScope("post_message")));
        assert_eq!(denied.reached, Stage::TokenValidated);
    }

    #[tokio::test]
    async fn expired_and_invalid_tokens_are_distinguished() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let eval = f.evaluator(PermissionModel::Acl);
        let req = Requirement::authenticated();
        let creds = f.bearer("owner", "post_message").await;

        let garbage = Credentials {
            bearer: Some("not-a-token".to_string()),
            capability: None,
        };
        let denied = eval.evaluate(&ctx(Method::GET, "/"), &garbage, &req).await.unwrap_err();
        assert!(matches!(denied.reason, Rejection::InvalidToken));

        f.clock.advance(Duration::minutes(10));
        let denied = eval.evaluate(&ctx(Method::GET, "/"), &creds, &req).await.unwrap_err();
        assert!(matches!(denied.reason, Rejection::Expired));
        assert_eq!(denied.reached, Stage::TokenPresented);
    }

    #[tokio::test]
    async fn no_credentials_is_unauthenticated() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let denied = f
            .evaluator(PermissionModel::Acl)
            .evaluate(
                &ctx(Method::GET, "/"),
                &Credentials::default(),
                &Requirement::authenticated(),
            )
            .await
            .unwrap_err();
        assert!(matches!(denied.reason, Rejection::Unauthenticated));
        assert_eq!(denied.reached, Stage::Unauthenticated);
    }

    #[tokio::test]
    async fn read_capability_allows_reads_only() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let path = f.messages_path();
        let uri = f.caps.mint(&path, Permissions::READ, Duration::minutes(10)).unwrap();
        let creds = Credentials {
            bearer: None,
            capability: Some(f.caps.parse_uri(&uri).unwrap().1.to_string()),
        };
        let eval = f.evaluator(PermissionModel::Acl);

        // Scope requirements do not apply to capabilities.
        let read = Requirement::scope(scope::LIST_MESSAGES).on_space(f.space_id, Permissions::READ);
        let auth = eval.evaluate(&ctx(Method::GET, &path), &creds, &read).await.unwrap();
        assert_eq!(auth.subject, None);
        assert_eq!(auth.perms, Permissions::READ);

        let write =
            Requirement::scope(scope::POST_MESSAGE).on_space(f.space_id, Permissions::WRITE);
        let denied = eval.evaluate(&ctx(Method::POST, &path), &creds, &write).await.unwrap_err();
        assert!(matches!(denied.reason, Rejection::InsufficientPermission(_)));

        let elsewhere = format!("{path}/1");
        let denied = eval.evaluate(&ctx(Method::GET, &elsewhere), &creds, &read).await.unwrap_err();
        assert!(matches!(denied.reason, Rejection::InvalidCapability));
    }

    #[tokio::test]
    async fn token_and_capability_must_both_pass() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let path = f.messages_path();
        // Full capability, but the token's subject has no row.
        let uri = f.caps.mint(&path, Permissions::ALL, Duration::minutes(10)).unwrap();
        let mut creds = f.bearer("mallory", "post_message").await;
        creds.capability = Some(f.caps.parse_uri(&uri).unwrap().1.to_string());

        let write =
            Requirement::scope(scope::POST_MESSAGE).on_space(f.space_id, Permissions::WRITE);
        let denied = f
            .evaluator(PermissionModel::Acl)
            .evaluate(&ctx(Method::POST, &path), &creds, &write)
            .await
            .unwrap_err();
        assert!(matches!(denied.reason, Rejection::InsufficientPermission(_)));
    }

    #[tokio::test]
    async fn revoked_database_token_is_invalid() {
        let f = Fixture::new(PermissionModel::Acl).await;
        let store = TokenStore::Database(DatabaseTokenStore::new(f.db.clone(), f.clock.clone()));
        let login = ctx(Method::POST, "/sessions");
        let token = Token::new("owner", f.clock.now() + Duration::minutes(10))
            .with_attribute(SCOPE_ATTRIBUTE, "post_message");
        let id = store.create(&login, &token).await.unwrap();
        store.revoke(&login, &id).await.unwrap();

        let creds = Credentials {
            bearer: Some(id),
            capability: None,
        };
        let denied = Evaluator::new(&store, &f.caps, &f.db, PermissionModel::Acl)
            .evaluate(&ctx(Method::GET, "/"), &creds, &Requirement::authenticated())
            .await
            .unwrap_err();
        assert!(matches!(denied.reason, Rejection::InvalidToken));
    }
}
