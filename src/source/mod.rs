//! Colon-delimited billing source strings and best-match resolution.

mod matcher;
mod tokenized;

pub use matcher::{find_best_match, generate_patterns};
pub use tokenized::TokenizedSource;

/// Token separator inside a source string.
pub const DELIMITER: char = ':';

/// Reserved token matching any value at its position.
pub const WILDCARD: &str = "*";

/// Upper bound on reference tokens; pattern generation is exponential in it.
pub const MAX_TOKENS: usize = 10;

/// Anything carrying a source string that can take part in matching.
pub trait Sourced {
    fn source(&self) -> &str;
}

impl Sourced for String {
    fn source(&self) -> &str {
        self
    }
}

impl Sourced for &str {
    fn source(&self) -> &str {
        self
    }
}
