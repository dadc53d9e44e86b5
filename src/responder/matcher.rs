//! Keyword matcher: compiles raw keyword strings into literal search patterns.
//!
//! Keywords are user-supplied text, never regex: every metacharacter is
//! escaped. Word boundaries are added on the sides where the keyword starts or
//! ends with an alphanumeric character, so "sale" does not fire on
//! "wholesale" while a punctuation keyword like "!!!" still matches anywhere.

use regex::{Regex, RegexBuilder};

use crate::error::MatchError;

/// A compiled, case-insensitive keyword pattern.
#[derive(Debug, Clone)]
pub struct KeywordPattern {
    keyword: String,
    regex: Regex,
}

impl KeywordPattern {
    /// The trimmed keyword this pattern was built from.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Search for the keyword anywhere in `text`. Absent text never matches.
    pub fn is_match(&self, text: Option<&str>) -> bool {
        text.is_some_and(|t| self.regex.is_match(t))
    }
}

/// Compile one sub-keyword. Returns `None` for keywords that are empty after
/// trimming.
pub fn compile(raw: &str) -> Result<Option<KeywordPattern>, MatchError> {
    let keyword = raw.trim();
    let (Some(first), Some(last)) = (keyword.chars().next(), keyword.chars().last()) else {
        return Ok(None);
    };

    let mut pattern = String::with_capacity(keyword.len() + 8);
    if first.is_alphanumeric() {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(keyword));
    if last.is_alphanumeric() {
        pattern.push_str(r"\b");
    }

    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| MatchError::InvalidPattern {
            keyword: keyword.to_string(),
            source,
        })?;

    Ok(Some(KeywordPattern {
        keyword: keyword.to_string(),
        regex,
    }))
}
