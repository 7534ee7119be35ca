//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::SocketAddr;

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4567))
}

pub fn default_database_path() -> String {
    "natter.db".to_string()
}

pub fn default_key_id() -> String {
    "k1".to_string()
}

// =============================================================================
// Token Defaults
// =============================================================================

pub fn default_token_ttl() -> u64 {
    600
}

pub fn default_scopes() -> String {
    "create_space post_message read_message list_messages delete_message add_member".to_string()
}

pub fn default_cleanup_interval() -> u64 {
    600
}

// =============================================================================
// Introspection Defaults
// =============================================================================

pub fn default_introspection_timeout_ms() -> u64 {
    2000
}

pub fn default_introspection_concurrency() -> usize {
    16
}

// =============================================================================
// Capability Defaults
// =============================================================================

pub fn default_capability_ttl() -> u64 {
    86_400
}

pub fn default_capability_max_ttl() -> u64 {
    30 * 86_400
}
