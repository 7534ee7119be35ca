//! Permission bits and roles.
//!
//! A permission string is a subset of `rwd` written in that order; `""` is the
//! empty set. Roles are a fixed mapping onto permission strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Parse errors for permission strings and role names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("invalid permission string {0:?}: expected a subset of \"rwd\" in that order")]
    InvalidPermissions(String),
    #[error("unknown role {0:?}")]
    UnknownRole(String),
}

/// A subset of read, write and delete.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b001);
    pub const WRITE: Self = Self(0b010);
    pub const DELETE: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    const LETTERS: [(char, Self); 3] = [('r', Self::READ), ('w', Self::WRITE), ('d', Self::DELETE)];

    /// Every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits required by `required` that `self` lacks.
    pub const fn missing(self, required: Self) -> Self {
        Self(required.0 & !self.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (letter, bit) in Self::LETTERS {
            if self.contains(bit) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({:?})", self.to_string())
    }
}

impl FromStr for Permissions {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rest = s;
        let mut perms = Self::NONE;
        for (letter, bit) in Self::LETTERS {
            if let Some(tail) = rest.strip_prefix(letter) {
                perms = perms.union(bit);
                rest = tail;
            }
        }
        if rest.is_empty() {
            Ok(perms)
        } else {
            Err(PermissionError::InvalidPermissions(s.to_string()))
        }
    }
}

impl TryFrom<String> for Permissions {
    type Error = PermissionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Permissions> for String {
    fn from(p: Permissions) -> Self {
        p.to_string()
    }
}

/// A per-space role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Moderator,
    Member,
    Observer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Owner, Role::Moderator, Role::Member, Role::Observer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Moderator => "moderator",
            Self::Member => "member",
            Self::Observer => "observer",
        }
    }

    /// The fixed permission bits this role implies.
    pub fn permissions(&self) -> Permissions {
        match self {
            Self::Owner => Permissions::ALL,
            Self::Moderator => Permissions::READ.union(Permissions::DELETE),
            Self::Member => Permissions::READ.union(Permissions::WRITE),
            Self::Observer => Permissions::READ,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| PermissionError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_subsets_only() {
        for text in ["", "r", "w", "d", "rw", "rd", "wd", "rwd"] {
            let perms: Permissions = text.parse().unwrap();
            assert_eq!(perms.to_string(), text);
        }
        for bad in ["wr", "rr", "x", "rwdx", "R", " r"] {
            assert!(bad.parse::<Permissions>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn contains_and_missing() {
        let rw: Permissions = "rw".parse().unwrap();
        assert!(rw.contains(Permissions::READ));
        assert!(!rw.contains(Permissions::ALL));
        assert_eq!(rw.missing(Permissions::ALL), Permissions::DELETE);
        assert!(rw.contains(Permissions::NONE));
        assert_eq!(rw.intersect("rd".parse().unwrap()), Permissions::READ);
    }

    #[test]
    fn roles_map_to_fixed_bits() {
        assert_eq!(Role::Owner.permissions().to_string(), "rwd");
        assert_eq!(Role::Moderator.permissions().to_string(), "rd");
        assert_eq!(Role::Member.permissions().to_string(), "rw");
        assert_eq!(Role::Observer.permissions().to_string(), "r");
        assert_eq!("moderator".parse::<Role>().unwrap(), Role::Moderator);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_the_string_form() {
        let json = serde_json::to_string(&Permissions::ALL).unwrap();
        assert_eq!(json, "\"rwd\"");
        let back: Permissions = serde_json::from_str("\"rd\"").unwrap();
        assert_eq!(back, "rd".parse().unwrap());
        assert!(serde_json::from_str::<Permissions>("\"dr\"").is_err());
    }
}
