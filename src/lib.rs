//! natter - token and capability authorization for the Natter social-spaces API.
//!
//! Bearer tokens come from a pluggable [`token::TokenStore`]; capability URIs
//! from [`caps::CapabilityController`]. [`authz::Evaluator`] combines both
//! with stored per-space permissions to gate every route in [`api`].

pub mod api;
pub mod authz;
pub mod caps;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod security;
pub mod token;
