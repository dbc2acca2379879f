//! Subscription patterns.
//!
//! A pattern matches an exact event kind or a structural rule. The string
//! syntax accepted by [`EventPattern::parse`]:
//!
//! | Syntax | Pattern |
//! |--------|---------|
//! | `*` | [`EventPattern::Any`] |
//! | `file.*` | [`EventPattern::Prefix`] (`"file."`) |
//! | `repository:users` | [`EventPattern::Repository`] |
//! | `repository:users:created` | [`EventPattern::RepositoryChange`] |
//! | anything else | [`EventPattern::Exact`] |

use core::fmt;

use crate::error::EventError;
use crate::event::{ChangeType, Event};

const REPOSITORY_PREFIX: &str = "repository:";

/// Rule deciding which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// Every event.
    Any,
    /// Events whose kind equals the string.
    Exact(String),
    /// Events whose kind starts with the string.
    Prefix(String),
    /// Any change to the named repository.
    Repository(String),
    /// One kind of change to the named repository.
    RepositoryChange(String, ChangeType),
}

impl EventPattern {
    /// Matches events of exactly this kind.
    #[must_use]
    pub fn exact(kind: impl Into<String>) -> Self {
        Self::Exact(kind.into())
    }

    /// Matches events whose kind starts with `prefix`.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Matches any change to repository `name`.
    #[must_use]
    pub fn repository(name: impl Into<String>) -> Self {
        Self::Repository(name.into())
    }

    /// Parses the string syntax described in the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidPattern`] for an empty string, an empty
    /// repository name or an unknown change type.
    pub fn parse(pattern: &str) -> Result<Self, EventError> {
        let invalid = || EventError::InvalidPattern(pattern.to_string());
        if pattern.is_empty() {
            return Err(invalid());
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }
        if let Some(rest) = pattern.strip_prefix(REPOSITORY_PREFIX) {
            return match rest.split_once(':') {
                Some((name, change)) if !name.is_empty() => {
                    let change = change.parse::<ChangeType>().map_err(|()| invalid())?;
                    Ok(Self::RepositoryChange(name.to_string(), change))
                }
                None if !rest.is_empty() => Ok(Self::Repository(rest.to_string())),
                _ => Err(invalid()),
            };
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return Ok(Self::Prefix(prefix.to_string()));
        }
        Ok(Self::Exact(pattern.to_string()))
    }

    /// Returns true if `event` is matched by this pattern.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(kind) => event.kind() == kind,
            Self::Prefix(prefix) => event.kind().starts_with(prefix.as_str()),
            Self::Repository(name) => event
                .change()
                .is_some_and(|change| change.repository_name == *name),
            Self::RepositoryChange(name, change_type) => event.change().is_some_and(|change| {
                change.repository_name == *name && change.change_type == *change_type
            }),
        }
    }
}

impl core::str::FromStr for EventPattern {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(kind) => f.write_str(kind),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Repository(name) => write!(f, "{REPOSITORY_PREFIX}{name}"),
            Self::RepositoryChange(name, change) => {
                write!(f, "{REPOSITORY_PREFIX}{name}:{}", change.as_str())
            }
        }
    }
}
