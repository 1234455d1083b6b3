//! Thin wrapper over `fancy_regex` for the handful of textual patterns the
//! runtime matches: prediction statements, command spacing and the scope
//! marker embedded in server responses.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    backend: fancy_regex::Regex,
}

impl Pattern {
    pub(crate) fn new(pattern: &str) -> Result<Self, PatternError> {
        let backend = fancy_regex::Regex::new(pattern).map_err(PatternError::from)?;
        Ok(Self { backend })
    }

    pub(crate) fn is_match(&self, input: &str) -> bool {
        self.backend.is_match(input).unwrap_or(false)
    }

    /// Capture groups of the first match; group 0 is the whole match.
    /// Backtracking-limit failures count as "no match".
    pub(crate) fn captures(&self, input: &str) -> Option<Vec<Option<String>>> {
        let captures = self.backend.captures(input).ok()??;
        Some(
            (0..captures.len())
                .map(|idx| captures.get(idx).map(|m| m.as_str().to_string()))
                .collect(),
        )
    }

    pub(crate) fn replace_all<'a>(&self, input: &'a str, replacement: &str) -> Cow<'a, str> {
        self.backend.replace_all(input, replacement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PatternError {
    message: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PatternError {}

impl From<fancy_regex::Error> for PatternError {
    fn from(value: fancy_regex::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

/// Compiles a fixed pattern once. A pattern that fails to compile yields
/// `None` forever and callers treat it as matching nothing.
pub(crate) fn cached(cell: &'static OnceLock<Option<Pattern>>, src: &str) -> Option<&'static Pattern> {
    cell.get_or_init(|| Pattern::new(src).ok()).as_ref()
}

pub(crate) fn escape(value: &str) -> Cow<'_, str> {
    let mut out = String::with_capacity(value.len());
    let mut changed = false;

    for ch in value.chars() {
        if is_pattern_meta(ch) {
            out.push('\\');
            changed = true;
        }
        out.push(ch);
    }

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(value)
    }
}

fn is_pattern_meta(ch: char) -> bool {
    matches!(
        ch,
        '\\' | '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_report_missing_groups() -> Result<(), PatternError> {
        let pattern = Pattern::new(r"^(a)(b)?$")?;
        assert_eq!(
            pattern.captures("a"),
            Some(vec![Some("a".to_string()), Some("a".to_string()), None])
        );
        assert_eq!(pattern.captures("c"), None);
        Ok(())
    }

    #[test]
    fn escaped_attribute_names_match_literally() -> Result<(), PatternError> {
        let pattern = Pattern::new(&format!("^{}$", escape("data-x.y")))?;
        assert!(pattern.is_match("data-x.y"));
        assert!(!pattern.is_match("data-xzy"));
        Ok(())
    }
}
