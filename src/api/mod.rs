//! The Natter HTTP API.
//!
//! | Route                                  | Scope            | Perm  |
//! |----------------------------------------|------------------|-------|
//! | `POST /users`                          | public           |       |
//! | `POST /sessions`                       | Basic or `full_access` |  |
//! | `DELETE /sessions`                     | the bearer token |       |
//! | `POST /spaces`                         | `create_space`   |       |
//! | `POST /spaces/:id/messages`            | `post_message`   | `w`   |
//! | `GET /spaces/:id/messages`             | `list_messages`  | `r`   |
//! | `GET /spaces/:id/messages/:msg`        | `read_message`   | `r`   |
//! | `DELETE /spaces/:id/messages/:msg`     | `delete_message` | `d`   |
//! | `POST /spaces/:id/members`             | `add_member`     | `rwd` |
//! | `POST /capabilities`                   | capability in body |     |

mod capabilities;
mod extract;
mod sessions;
mod spaces;
mod users;

pub use extract::Presented;

use crate::authz::Evaluator;
use crate::caps::CapabilityController;
use crate::clock::SharedClock;
use crate::config::{Config, PermissionModel};
use crate::db::Database;
use crate::error::ApiError;
use crate::keys::KeyRing;
use crate::metrics;
use crate::security::headers::harden;
use crate::token::{TokenError, TokenStore};
use axum::Router;
use axum::extract::Request;
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::{delete, get, post};
use chrono::Duration;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Everything a handler can reach.
pub struct Services {
    pub db: Database,
    pub tokens: TokenStore,
    pub caps: CapabilityController,
    pub clock: SharedClock,
    pub model: PermissionModel,
    /// Lifetime of tokens minted at login.
    pub token_ttl: Duration,
    /// Scopes granted when login asks for none.
    pub default_scopes: String,
    pub base_url: String,
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState(Arc<Services>);

impl AppState {
    pub fn new(services: Services) -> Self {
        Self(Arc::new(services))
    }

    /// Wire up the configured token store and capability controller.
    pub fn from_config(
        config: &Config,
        keys: &KeyRing,
        db: Database,
        clock: SharedClock,
    ) -> Result<Self, TokenError> {
        let tokens = TokenStore::from_config(config, keys, db.clone(), clock.clone())?;
        let base_url = config.server.base_url.trim_end_matches('/').to_string();
        let caps = CapabilityController::new(keys, &base_url, &config.capabilities, clock.clone());
        Ok(Self::new(Services {
            db,
            tokens,
            caps,
            clock,
            model: config.authorization.model,
            token_ttl: Duration::seconds(config.tokens.ttl_secs as i64),
            default_scopes: config.tokens.default_scopes.clone(),
            base_url,
        }))
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.tokens, &self.caps, &self.db, self.model)
    }

    /// Absolute URI for a server path.
    pub fn uri(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Deref for AppState {
    type Target = Services;

    fn deref(&self) -> &Services {
        &self.0
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/users", post(users::register))
        .route("/spaces", post(spaces::create_space))
        .route(
            "/spaces/:space_id/messages",
            get(spaces::list_messages).post(spaces::post_message),
        )
        .route(
            "/spaces/:space_id/messages/:msg_id",
            get(spaces::read_message).delete(spaces::delete_message),
        )
        .route("/spaces/:space_id/members", post(spaces::add_member))
        .route("/capabilities", post(capabilities::share));

    app = if state.tokens.supports_create() {
        app.route("/sessions", post(sessions::login).delete(sessions::logout))
    } else {
        info!(
            backend = state.tokens.kind(),
            "token backend cannot mint tokens; POST /sessions not mounted"
        );
        app.route("/sessions", delete(sessions::logout))
    };

    app.fallback(not_found)
        .layer(from_fn(track))
        .layer(from_fn(harden))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Count and time every request.
async fn track(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
