//! Tokenized representation of a source string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DELIMITER;
use crate::{Error, Result};

/// An ordered, immutable sequence of source tokens.
///
/// Joining the tokens with `:` reproduces the original string exactly, so a
/// token can never contain the delimiter itself.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TokenizedSource {
    tokens: Vec<String>,
}

impl TokenizedSource {
    pub fn parse(source: &str) -> Self {
        Self {
            tokens: source.split(DELIMITER).map(str::to_string).collect(),
        }
    }

    /// Builds a source from individual tokens, rejecting any containing `:`.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if let Some(bad) = tokens.iter().find(|t| t.contains(DELIMITER)) {
            return Err(Error::InvalidSource {
                source_string: tokens.join(":"),
                message: format!("token {:?} contains the delimiter", bad),
            });
        }
        if tokens.is_empty() {
            return Err(Error::InvalidSource {
                source_string: String::new(),
                message: "no tokens".into(),
            });
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn first(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or_default()
    }

    /// Returns a new source with `extra` tokens appended.
    pub fn extended<I, S>(&self, extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_tokens(
            self.tokens
                .iter()
                .cloned()
                .chain(extra.into_iter().map(Into::into)),
        )
    }
}

impl fmt::Display for TokenizedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(":"))
    }
}

impl FromStr for TokenizedSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for TokenizedSource {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for TokenizedSource {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<TokenizedSource> for String {
    fn from(source: TokenizedSource) -> Self {
        source.to_string()
    }
}
