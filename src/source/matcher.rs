//! Most-specific-first matching of source strings against a rule catalog.
//!
//! A reference source such as `query:zone:tenant:namespace:plan` is expanded
//! into progressively less specific patterns. For each prefix length, the
//! literal prefix comes first, followed by every combination of interior
//! tokens (all but the first and the last of the prefix) replaced by
//! [`WILDCARD`]. The first catalog entry equal to a pattern wins, so catalog
//! order never affects the result.

use super::{MAX_TOKENS, Sourced, TokenizedSource, WILDCARD};
use crate::{Error, Result};

/// Generates match patterns for `reference`, most specific first.
///
/// Fails with [`Error::UnsupportedCardinality`] above [`MAX_TOKENS`] tokens.
pub fn generate_patterns(reference: &TokenizedSource) -> Result<Vec<String>> {
    let tokens = reference.tokens();
    if tokens.len() > MAX_TOKENS {
        return Err(Error::UnsupportedCardinality {
            tokens: tokens.len(),
            max: MAX_TOKENS,
        });
    }

    let mut patterns = Vec::new();
    for i in (1..=tokens.len()).rev() {
        let prefix = &tokens[..i];
        patterns.push(prefix.join(":"));

        if i > 2 {
            let positions = i - 2;
            for j in 1u32..(1u32 << positions) {
                let mut pattern: Vec<&str> = prefix.iter().map(String::as_str).collect();
                for p in 0..positions {
                    if j & (1 << p) != 0 {
                        pattern[i - 2 - p] = WILDCARD;
                    }
                }
                patterns.push(pattern.join(":"));
            }
        }
    }
    Ok(patterns)
}

/// Returns the candidate matching the most specific pattern of `reference`.
///
/// `Ok(None)` means no candidate applies; that is not an error.
pub fn find_best_match<'a, T: Sourced>(
    reference: &TokenizedSource,
    candidates: &'a [T],
) -> Result<Option<&'a T>> {
    for pattern in generate_patterns(reference)? {
        if let Some(hit) = candidates.iter().find(|c| c.source() == pattern) {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn best<'a>(reference: &str, candidates: &'a [&'a str]) -> Option<&'a str> {
        find_best_match(&TokenizedSource::parse(reference), candidates)
            .unwrap()
            .copied()
    }

    #[test]
    fn test_pattern_order() {
        let patterns = generate_patterns(&TokenizedSource::parse("a:b:c:d")).unwrap();
        assert_eq!(
            patterns,
            vec![
                "a:b:c:d", "a:b:*:d", "a:*:c:d", "a:*:*:d", "a:b:c", "a:*:c", "a:b", "a",
            ]
        );
    }

    #[test]
    fn test_short_references_have_no_wildcards() {
        let patterns = generate_patterns(&TokenizedSource::parse("a:b")).unwrap();
        assert_eq!(patterns, vec!["a:b", "a"]);

        let patterns = generate_patterns(&TokenizedSource::parse("a")).unwrap();
        assert_eq!(patterns, vec!["a"]);
    }

    #[test]
    fn test_pattern_count() {
        // Per prefix length i: 1 literal + (2^(i-2) - 1) wildcard variants for i > 2.
        let patterns = generate_patterns(&TokenizedSource::parse("1:2:3:4:5")).unwrap();
        assert_eq!(patterns.len(), 8 + 4 + 2 + 1 + 1);
    }

    #[test]
    fn test_wildcard_beats_shorter_literal() {
        assert_eq!(best("a:b:c:d", &["a", "a:b", "a:*:c"]), Some("a:*:c"));
    }

    #[test]
    fn test_falls_back_to_shortest_prefix() {
        assert_eq!(best("a:b:c:d", &["a", "a:x", "a:*:y"]), Some("a"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(best("a:b:c:d", &["x", "x:y"]), None);
    }

    #[test]
    fn test_catalog_order_irrelevant() {
        assert_eq!(
            best("a:b:c:d", &["a", "a:b:c:d", "a:*:c:d"]),
            Some("a:b:c:d")
        );
        assert_eq!(best("a:b:c:d", &["a:*:c:d", "a:b:*:d"]), Some("a:b:*:d"));
    }

    #[test]
    fn test_wildcard_never_replaces_first_or_last() {
        assert_eq!(best("a:b:c", &["*:b:c", "a:b:*"]), None);
    }

    #[test]
    fn test_ten_tokens_supported() {
        let reference = "1:2:3:4:5:6:7:8:9:10";
        assert_eq!(best(reference, &["1:*:*:4"]), Some("1:*:*:4"));
    }

    #[test]
    fn test_cardinality_guard() {
        let reference = TokenizedSource::parse("1:2:3:4:5:6:7:8:9:10:11");
        let err = find_best_match(&reference, &["1"]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedCardinality { tokens: 11, max: 10 }
        ));
    }
}
