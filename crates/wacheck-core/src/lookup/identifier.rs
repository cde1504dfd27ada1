use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::LookupError;

/// Digits only, at least one
static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// A validated lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validate a raw identifier
    pub fn parse(raw: &str) -> Result<Self, LookupError> {
        if IDENTIFIER_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(LookupError::Validation {
                input: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
