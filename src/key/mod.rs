//! Opaque composite keys for grouping usage observations.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Separator placed between fields before encoding.
pub const KEY_DELIMITER: char = ';';

/// Escapes a literal delimiter or escape character inside a field.
const ESCAPE: char = '\\';

/// URL-safe base64 encoding of `;`-joined fields.
///
/// A `;` or `\` inside a field is escaped with a `\`, so any field list
/// round-trips exactly and distinct lists never share a key.
///
/// Keys compare byte-for-byte on their encoded form and are only valid for
/// the aggregation run that produced them.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn encode<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = fields
            .into_iter()
            .map(|f| escape(f.as_ref()))
            .collect::<Vec<_>>()
            .join(&KEY_DELIMITER.to_string());
        Self(URL_SAFE.encode(joined.as_bytes()))
    }

    /// Recovers the encoded fields.
    ///
    /// Fails with [`Error::MalformedKey`] on invalid base64, invalid UTF-8 or
    /// a dangling escape. Any decodable payload has field structure: text
    /// without a delimiter is one field, and the empty key is `[""]`.
    pub fn decode(&self) -> Result<Vec<String>> {
        let bytes = URL_SAFE
            .decode(self.0.as_bytes())
            .map_err(|e| self.malformed(e.to_string()))?;
        let joined = String::from_utf8(bytes).map_err(|e| self.malformed(e.to_string()))?;

        let mut fields = Vec::new();
        let mut current = String::new();
        let mut chars = joined.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(next @ (ESCAPE | KEY_DELIMITER)) => current.push(next),
                    Some(other) => {
                        return Err(self.malformed(format!("invalid escape \\{}", other)));
                    }
                    None => return Err(self.malformed("dangling escape")),
                },
                KEY_DELIMITER => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        fields.push(current);
        Ok(fields)
    }

    /// Wraps an already-encoded key, e.g. one read back from a report.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedKey {
            key: self.0.clone(),
            reason: reason.into(),
        }
    }
}

fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        if c == ESCAPE || c == KEY_DELIMITER {
            escaped.push(ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
