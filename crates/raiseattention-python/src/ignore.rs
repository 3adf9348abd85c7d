//! Inline ignore-comment parsing.
//!
//! Grammar (case-insensitive prefixes `raiseattention:` / `ra:`):
//!
//! ```text
//! # raiseattention: ignore[ValueError, KeyError]
//! # ra: ignore[OSError]
//! ```
//!
//! A directive applies to the physical line it sits on; a multi-line
//! call is covered when the directive sits on any line of the call
//! expression. A bare `ignore` with no bracket list is invalid: it
//! suppresses nothing and is itself reported as a warning.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use raiseattention_core::text::short_name;

static VALID_IGNORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#\s*(?:raiseattention|ra)\s*:\s*ignore\s*\[\s*([^\]]+?)\s*\]")
        .expect("valid-ignore pattern")
});

static IGNORE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)#\s*(?:raiseattention|ra)\s*:\s*ignore").expect("ignore-prefix pattern")
});

/// A parsed ignore directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreDirective {
    /// 1-indexed line the directive appears on.
    pub line: u32,
    /// Exception short names listed in the brackets.
    pub exception_types: BTreeSet<String>,
    /// The raw comment text, for messages.
    pub raw: String,
}

/// An ignore directive missing its bracket list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIgnoreDirective {
    pub line: u32,
    pub raw: String,
}

/// All directives found in one file.
#[derive(Debug, Clone, Default)]
pub struct IgnoreIndex {
    directives: HashMap<u32, IgnoreDirective>,
    pub invalid: Vec<InvalidIgnoreDirective>,
}

impl IgnoreIndex {
    /// Parse every ignore comment in a source file.
    pub fn parse(source: &str) -> IgnoreIndex {
        let mut index = IgnoreIndex::default();

        for (offset, line) in source.lines().enumerate() {
            let line_no = offset as u32 + 1;

            if let Some(captures) = VALID_IGNORE.captures(line) {
                let types: BTreeSet<String> = captures[1]
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                index.directives.insert(
                    line_no,
                    IgnoreDirective {
                        line: line_no,
                        exception_types: types,
                        raw: line.trim().to_string(),
                    },
                );
            } else if IGNORE_PREFIX.is_match(line) {
                index.invalid.push(InvalidIgnoreDirective {
                    line: line_no,
                    raw: line.trim().to_string(),
                });
            }
        }

        index
    }

    /// Whether `exception_type` is suppressed on any line in
    /// `[start_line, end_line]` (the span of the call statement).
    ///
    /// Qualified classes match on their short name:
    /// `json.JSONDecodeError` is suppressed by `ignore[JSONDecodeError]`.
    pub fn should_ignore(&self, start_line: u32, end_line: u32, exception_type: &str) -> bool {
        let name = short_name(exception_type);
        (start_line..=end_line.max(start_line))
            .any(|line| {
                self.directives
                    .get(&line)
                    .is_some_and(|d| d.exception_types.contains(name))
            })
    }

    /// Directive on a specific line, if any.
    pub fn directive_at(&self, line: u32) -> Option<&IgnoreDirective> {
        self.directives.get(&line)
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty() && self.invalid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_directive() {
        let index = IgnoreIndex::parse("x = f()  # raiseattention: ignore[ValueError]\n");
        assert!(index.should_ignore(1, 1, "ValueError"));
        assert!(!index.should_ignore(1, 1, "KeyError"));
        assert!(index.invalid.is_empty());
    }

    #[test]
    fn short_prefix_and_case_are_accepted() {
        for comment in [
            "# ra: ignore[OSError]",
            "# RA: ignore[OSError]",
            "# RaiseAttention: ignore[OSError]",
            "# raiseattention:ignore[OSError]",
        ] {
            let source = format!("f()  {comment}\n");
            let index = IgnoreIndex::parse(&source);
            assert!(index.should_ignore(1, 1, "OSError"), "failed for {comment}");
        }
    }

    #[test]
    fn multiple_types_split_on_commas() {
        let index = IgnoreIndex::parse("f()  # ra: ignore[ValueError, KeyError , OSError]\n");
        for exc in ["ValueError", "KeyError", "OSError"] {
            assert!(index.should_ignore(1, 1, exc));
        }
    }

    #[test]
    fn qualified_names_match_on_short_name() {
        let index = IgnoreIndex::parse("f()  # ra: ignore[JSONDecodeError]\n");
        assert!(index.should_ignore(1, 1, "json.JSONDecodeError"));
    }

    #[test]
    fn bare_ignore_is_invalid_and_suppresses_nothing() {
        let index = IgnoreIndex::parse("f()  # raiseattention: ignore\n");
        assert!(!index.should_ignore(1, 1, "ValueError"));
        assert_eq!(index.invalid.len(), 1);
        assert_eq!(index.invalid[0].line, 1);
    }

    #[test]
    fn directive_on_continuation_line_covers_call_span() {
        let source = "f(\n    1,\n)  # ra: ignore[ValueError]\n";
        let index = IgnoreIndex::parse(source);
        assert!(index.should_ignore(1, 3, "ValueError"));
        assert!(!index.should_ignore(1, 1, "ValueError"));
    }

    #[test]
    fn unrelated_comments_are_left_alone() {
        let index = IgnoreIndex::parse("f()  # type: ignore[misc]\ng()  # plain note\n");
        assert!(index.is_empty());
    }

    #[test]
    fn removing_the_comment_restores_the_diagnostic() {
        // Idempotence partner: without the comment nothing is ignored.
        let with = IgnoreIndex::parse("f()  # ra: ignore[ValueError]\n");
        let without = IgnoreIndex::parse("f()\n");
        assert!(with.should_ignore(1, 1, "ValueError"));
        assert!(!without.should_ignore(1, 1, "ValueError"));
    }
}
