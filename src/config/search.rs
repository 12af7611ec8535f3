//! Search patterns used by every exclusion list.
//!
//! A pattern is written as `<type>:<value>`:
//!
//! ```toml
//! [model.exclude]
//! models = [
//!     "gl:session*",      # glob, case-insensitive
//!     "plain:Token",      # exact, case-insensitive
//!     "re:^Audit[A-Z]",   # regex, case-sensitive, anchored at the start
//!     "Draft*",           # no prefix: glob
//! ]
//! ```
//!
//! The type prefix is matched case-insensitively by its leading letters
//! (`gl`/`glob`, `pl`/`plain`, `re`/`regex`). A table `{ type = "...", value = "..." }`
//! is accepted as well. Glob and plain values are lower-cased when parsed, and regex
//! values are compiled when parsed, so a malformed expression fails configuration
//! resolution instead of surfacing during evaluation.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How a [`SearchPattern`] compares against a candidate string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Shell-style wildcard match (`*`, `?`, `[...]`), case-insensitive.
    Glob,
    /// Exact match, case-insensitive.
    Plain,
    /// Regular expression anchored at the start of the candidate, case-sensitive.
    Regex,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Glob => write!(f, "glob"),
            PatternKind::Plain => write!(f, "plain"),
            PatternKind::Regex => write!(f, "regex"),
        }
    }
}

/// Errors produced while parsing a search pattern.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Unknown search pattern type '{0}' (expected glob, plain or regex)")]
    UnknownKind(String),

    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A parsed, ready-to-match search pattern.
#[derive(Debug, Clone)]
pub struct SearchPattern {
    kind: PatternKind,
    value: String,
    /// Compiled matcher for glob and regex patterns. Plain patterns compare directly.
    matcher: Option<Regex>,
}

impl SearchPattern {
    /// Build a pattern of the given kind. Glob and plain values are lower-cased.
    pub fn new(kind: PatternKind, value: impl Into<String>) -> Result<Self, PatternError> {
        let value = value.into();
        match kind {
            PatternKind::Plain => Ok(Self {
                kind,
                value: value.to_lowercase(),
                matcher: None,
            }),
            PatternKind::Glob => {
                let value = value.to_lowercase();
                let matcher = Regex::new(&glob_to_regex(&value)).map_err(|source| {
                    PatternError::InvalidRegex {
                        pattern: value.clone(),
                        source,
                    }
                })?;
                Ok(Self {
                    kind,
                    value,
                    matcher: Some(matcher),
                })
            }
            PatternKind::Regex => {
                let matcher = Regex::new(&format!("^(?:{value})")).map_err(|source| {
                    PatternError::InvalidRegex {
                        pattern: value.clone(),
                        source,
                    }
                })?;
                Ok(Self {
                    kind,
                    value,
                    matcher: Some(matcher),
                })
            }
        }
    }

    pub fn glob(value: impl Into<String>) -> Result<Self, PatternError> {
        Self::new(PatternKind::Glob, value)
    }

    pub fn plain(value: impl Into<String>) -> Result<Self, PatternError> {
        Self::new(PatternKind::Plain, value)
    }

    pub fn regex(value: impl Into<String>) -> Result<Self, PatternError> {
        Self::new(PatternKind::Regex, value)
    }

    /// Parse the `<type>:<value>` notation. Input without a type prefix is a glob.
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let Some((prefix, value)) = input.split_once(':') else {
            return Self::glob(input);
        };

        // Only a run of word characters counts as a type prefix; anything else is
        // part of a glob value (e.g. `a.b:c`).
        if !prefix.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Self::glob(input);
        }

        let prefix = prefix.to_lowercase();
        if prefix.is_empty() || prefix.starts_with("gl") {
            Self::glob(value)
        } else if prefix.starts_with("pl") {
            Self::plain(value)
        } else if prefix.starts_with("re") {
            Self::regex(value)
        } else {
            Err(PatternError::UnknownKind(prefix))
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Test a single candidate against this pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        match (self.kind, &self.matcher) {
            (PatternKind::Plain, _) => candidate.to_lowercase() == self.value,
            (PatternKind::Glob, Some(matcher)) => matcher.is_match(&candidate.to_lowercase()),
            (PatternKind::Regex, Some(matcher)) => matcher.is_match(candidate),
            (_, None) => false,
        }
    }
}

impl PartialEq for SearchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value == other.value
    }
}

impl Eq for SearchPattern {}

impl std::hash::Hash for SearchPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.value.hash(state);
    }
}

impl fmt::Display for SearchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

impl std::str::FromStr for SearchPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SearchPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Text(String),
    Table {
        #[serde(rename = "type")]
        kind: String,
        value: String,
    },
}

impl<'de> Deserialize<'de> for SearchPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPattern::deserialize(deserializer)?;
        let parsed = match raw {
            RawPattern::Text(text) => SearchPattern::parse(&text),
            RawPattern::Table { kind, value } => SearchPattern::parse(&format!("{kind}:{value}")),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// Returns true if any pattern in `scope` matches `candidate`.
pub fn candidate_in_scope(candidate: &str, scope: &[SearchPattern]) -> bool {
    scope.iter().any(|pattern| pattern.matches(candidate))
}

/// Set union that keeps the order of `left` and appends unseen patterns from `right`.
pub fn union_patterns(left: &[SearchPattern], right: &[SearchPattern]) -> Vec<SearchPattern> {
    let mut merged = left.to_vec();
    for pattern in right {
        if !merged.contains(pattern) {
            merged.push(pattern.clone());
        }
    }
    merged
}

/// Translate an fnmatch-style glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 6);
    out.push_str("(?s)^");

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // A leading `!` negates, and a `]` directly after the opening
                // bracket (or the negation) is a literal member.
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }

                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    let mut k = i + 1;
                    out.push('[');
                    if chars[k] == '!' {
                        out.push('^');
                        k += 1;
                    }
                    for &c in &chars[k..j] {
                        match c {
                            '\\' | '[' | ']' | '&' | '~' | '^' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("gl:app*", PatternKind::Glob, "app*")]
    #[case("glob:App*", PatternKind::Glob, "app*")]
    #[case("pl:App", PatternKind::Plain, "app")]
    #[case("PLAIN:app", PatternKind::Plain, "app")]
    #[case("re:^App.*$", PatternKind::Regex, "^App.*$")]
    #[case("regex:^app", PatternKind::Regex, "^app")]
    #[case(":app*", PatternKind::Glob, "app*")]
    #[case("App", PatternKind::Glob, "app")]
    #[case("a.b:c", PatternKind::Glob, "a.b:c")]
    fn test_parse_prefixes(#[case] input: &str, #[case] kind: PatternKind, #[case] value: &str) {
        let pattern = SearchPattern::parse(input).unwrap();
        assert_eq!(pattern.kind(), kind);
        assert_eq!(pattern.value(), value);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let err = SearchPattern::parse("fuzzy:app").unwrap_err();
        assert!(matches!(err, PatternError::UnknownKind(ref k) if k == "fuzzy"));
    }

    #[test]
    fn test_malformed_regex_rejected_at_parse() {
        let err = SearchPattern::parse("re:(unclosed").unwrap_err();
        assert!(matches!(err, PatternError::InvalidRegex { .. }));
    }

    #[test]
    fn test_plain_is_case_insensitive_exact() {
        let pattern = SearchPattern::plain("foo").unwrap();
        assert!(candidate_in_scope("Foo", std::slice::from_ref(&pattern)));
        assert!(!candidate_in_scope("FooBar", &[pattern]));
    }

    #[test]
    fn test_glob_is_case_insensitive() {
        let pattern = SearchPattern::glob("foo*").unwrap();
        assert!(candidate_in_scope("FooBar", std::slice::from_ref(&pattern)));
        assert!(!candidate_in_scope("BarFoo", &[pattern]));
    }

    #[test]
    fn test_regex_is_case_sensitive_and_start_anchored() {
        let anchored = SearchPattern::regex("^foo$").unwrap();
        assert!(!candidate_in_scope("FooBar", std::slice::from_ref(&anchored)));

        let prefix = SearchPattern::regex("Foo").unwrap();
        assert!(prefix.matches("FooBar"));
        assert!(!prefix.matches("foobar"));
        assert!(!prefix.matches("BarFoo"));
    }

    #[rstest]
    #[case("session*", "sessions", true)]
    #[case("te?t", "test", true)]
    #[case("te?t", "teest", false)]
    #[case("[abc]x", "bx", true)]
    #[case("[!abc]x", "bx", false)]
    #[case("[!abc]x", "dx", true)]
    #[case("a.b", "a.b", true)]
    #[case("a.b", "axb", false)]
    #[case("[unclosed", "[unclosed", true)]
    #[case("*.py", "src/app/models.py", true)]
    fn test_glob_semantics(#[case] glob: &str, #[case] candidate: &str, #[case] expected: bool) {
        let pattern = SearchPattern::glob(glob).unwrap();
        assert_eq!(pattern.matches(candidate), expected, "{glob} vs {candidate}");
    }

    #[test]
    fn test_deserialize_string_and_table() {
        #[derive(Deserialize)]
        struct Holder {
            patterns: Vec<SearchPattern>,
        }

        let holder: Holder = toml::from_str(
            r#"
            patterns = ["pl:Admin", { type = "regex", value = "^X" }]
        "#,
        )
        .unwrap();
        assert_eq!(holder.patterns[0], SearchPattern::plain("admin").unwrap());
        assert_eq!(holder.patterns[1].kind(), PatternKind::Regex);
    }

    #[test]
    fn test_serialize_round_trips_notation() {
        let pattern = SearchPattern::plain("Admin").unwrap();
        assert_eq!(serde_json::to_string(&pattern).unwrap(), "\"plain:admin\"");
    }

    #[test]
    fn test_union_deduplicates() {
        let left = vec![SearchPattern::plain("a").unwrap()];
        let right = vec![
            SearchPattern::plain("A").unwrap(),
            SearchPattern::glob("b*").unwrap(),
        ];
        let merged = union_patterns(&left, &right);
        assert_eq!(merged.len(), 2);
    }
}
