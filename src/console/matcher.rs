//! Pattern matching for pattern triggers.
//!
//! A pattern trigger owns an immutable matcher that is evaluated against the
//! text of every record.

use regex::{Regex, RegexSet};

/// Decides whether a record's text satisfies a pattern trigger.
///
/// Matchers are shared across threads and must not mutate on evaluation.
pub trait Matcher: Send + Sync + 'static {
    /// Returns true if `text` matches.
    fn is_match(&self, text: &str) -> bool;

    /// Human-readable form used in logs.
    fn describe(&self) -> String;
}

impl Matcher for Regex {
    fn is_match(&self, text: &str) -> bool {
        Regex::is_match(self, text)
    }

    fn describe(&self) -> String {
        self.as_str().to_string()
    }
}

/// Matches if any pattern in the set matches.
impl Matcher for RegexSet {
    fn is_match(&self, text: &str) -> bool {
        RegexSet::is_match(self, text)
    }

    fn describe(&self) -> String {
        self.patterns().join(" | ")
    }
}

/// Matches records starting with a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix(pub String);

impl Matcher for Prefix {
    fn is_match(&self, text: &str) -> bool {
        text.starts_with(self.0.as_str())
    }

    fn describe(&self) -> String {
        format!("prefix:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_matches_anywhere_unless_anchored() {
        let anchored = Regex::new("^f.*").unwrap();
        assert!(Matcher::is_match(&anchored, "foo"));
        assert!(!Matcher::is_match(&anchored, "off"));

        let loose = Regex::new("o+").unwrap();
        assert!(Matcher::is_match(&loose, "off"));
        assert_eq!(loose.describe(), "o+");
    }

    #[test]
    fn regex_set_matches_any_member() {
        let set = RegexSet::new(["^get ", "^set "]).unwrap();
        assert!(Matcher::is_match(&set, "set x 1"));
        assert!(!Matcher::is_match(&set, "del x"));
        assert_eq!(set.describe(), "^get  | ^set ");
    }

    #[test]
    fn prefix_matches_start_only() {
        let p = Prefix("say ".to_string());
        assert!(p.is_match("say hello"));
        assert!(!p.is_match("i say hello"));
        assert_eq!(p.describe(), "prefix:say ");
    }
}
