//! Security primitives shared by the HTTP layer.
//!
//! - **Password**: Argon2 hashing and the registration length policy
//! - **Headers**: hardening headers applied to every response

pub mod headers;
pub mod password;
