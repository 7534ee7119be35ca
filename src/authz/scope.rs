//! OAuth-style scopes carried in a token's `scope` attribute.

use std::collections::BTreeSet;
use std::fmt;

pub const CREATE_SPACE: &str = "create_space";
pub const POST_MESSAGE: &str = "post_message";
pub const READ_MESSAGE: &str = "read_message";
pub const LIST_MESSAGES: &str = "list_messages";
pub const DELETE_MESSAGE: &str = "delete_message";
pub const ADD_MEMBER: &str = "add_member";
/// Lets a bearer token mint further tokens at `POST /sessions`.
pub const FULL_ACCESS: &str = "full_access";

/// Every scope the API can require.
pub const KNOWN: [&str; 7] = [
    CREATE_SPACE,
    POST_MESSAGE,
    READ_MESSAGE,
    LIST_MESSAGES,
    DELETE_MESSAGE,
    ADD_MEMBER,
    FULL_ACCESS,
];

/// Whether `name` is a scope the API understands.
pub fn is_known(name: &str) -> bool {
    KNOWN.contains(&name)
}

/// A parsed, space-separated scope string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Split on whitespace. Unknown names are kept; they simply never match.
    pub fn parse(text: &str) -> Self {
        Self(text.split_whitespace().map(str::to_string).collect())
    }

    /// Parse a requested scope string, refusing unknown names.
    pub fn parse_known(text: &str) -> Result<Self, String> {
        let set = Self::parse(text);
        match set.0.iter().find(|name| !is_known(name)) {
            Some(unknown) => Err(unknown.clone()),
            None => Ok(set),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}
