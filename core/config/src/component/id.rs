// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const SEPARATOR: char = '/';

#[derive(Error, Debug, PartialEq)]
pub enum IdError {
    #[error("empty component kind")]
    EmptyKind,
    #[error("invalid component kind: {0}")]
    InvalidKind(String),
    #[error("invalid component id: {0}")]
    InvalidId(String),
}

/// Kind of a component, e.g. `context`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kind(String);

impl Kind {
    pub fn new(kind: &str) -> Result<Self, IdError> {
        if kind.is_empty() {
            return Err(IdError::EmptyKind);
        }

        if kind.contains(SEPARATOR) || kind.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidKind(kind.to_string()));
        }

        Ok(Kind(kind.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a component instance, rendered as `kind/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ID {
    kind: Kind,
    name: String,
}

impl ID {
    pub fn new_with_name(kind: Kind, name: &str) -> Result<Self, IdError> {
        if name.contains(SEPARATOR) {
            return Err(IdError::InvalidId(name.to_string()));
        }

        Ok(ID {
            kind,
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}{}{}", self.kind, SEPARATOR, self.name)
        }
    }
}

impl FromStr for ID {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(SEPARATOR) {
            Some((kind, name)) => ID::new_with_name(Kind::new(kind)?, name),
            None => ID::new_with_name(Kind::new(s)?, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(Kind::new("context").unwrap().as_str(), "context");
        assert_eq!(Kind::new(""), Err(IdError::EmptyKind));
        assert!(matches!(Kind::new("a/b"), Err(IdError::InvalidKind(_))));
    }

    #[test]
    fn test_id_parse_and_display() {
        let id: ID = "context/server".parse().unwrap();
        assert_eq!(id.kind().as_str(), "context");
        assert_eq!(id.name(), "server");
        assert_eq!(id.to_string(), "context/server");

        let id: ID = "context".parse().unwrap();
        assert_eq!(id.name(), "");
        assert_eq!(id.to_string(), "context");

        assert!("context/a/b".parse::<ID>().is_err());
    }
}
