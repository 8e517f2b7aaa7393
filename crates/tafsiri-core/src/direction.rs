//! Language direction keys.
//!
//! A direction identifies one translation task as `source__target`, with an
//! optional variant suffix: `en__it`, `en__it@legal`. Keys are unique within
//! a registry; several keys may resolve to the same shared checkpoint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An ordered (source language, target language, optional variant) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Direction {
    source: String,
    target: String,
    variant: Option<String>,
}

impl Direction {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// The same direction with any variant stripped.
    pub fn without_variant(&self) -> Self {
        Self {
            source: self.source.clone(),
            target: self.target.clone(),
            variant: None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.source, self.target)?;
        if let Some(variant) = &self.variant {
            write!(f, "@{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidInput(format!("Malformed direction key: '{}'", s));

        let (pair, variant) = match s.split_once('@') {
            Some((pair, variant)) if !variant.is_empty() => (pair, Some(variant)),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };
        let (source, target) = pair.split_once("__").ok_or_else(invalid)?;
        if source.is_empty() || target.is_empty() || target.contains("__") {
            return Err(invalid());
        }

        let direction = Direction::new(source, target);
        Ok(match variant {
            Some(variant) => direction.with_variant(variant),
            None => direction,
        })
    }
}

impl TryFrom<String> for Direction {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Direction> for String {
    fn from(direction: Direction) -> Self {
        direction.to_string()
    }
}
