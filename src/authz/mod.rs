//! Request authorization.
//!
//! - [`perms`]: `rwd` permission bits and the fixed role mapping
//! - [`scope`]: scope names carried by tokens
//! - [`evaluator`]: the per-request state machine that combines a bearer
//!   token, a capability, scopes and stored permissions into a decision

pub mod evaluator;
pub mod perms;
pub mod scope;

pub use evaluator::{AuthContext, Credentials, Denied, Evaluator, Rejection, Requirement, Stage};
pub use perms::{PermissionError, Permissions, Role};
pub use scope::ScopeSet;
