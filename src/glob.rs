// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Glob pattern matching.
//!
//! Every pattern in gkn, be it a repository filter, a sync include rule, or a
//! guard rule, is evaluated here. Patterns are compiled into anchored regular
//! expressions according to one of two __dialects__.
//!
//! # Path Dialect
//!
//! Used for anything that looks like a path: repository names, relative file
//! paths, and guard path rules.
//!
//! - `*` matches zero or more characters except `/`.
//! - `**` matches zero or more characters including `/`.
//! - `?` matches exactly one character except `/`.
//! - A leading `**/` also matches a value with no `/` in it, so `**/bar`
//!   matches both `foo/bar` and `bar`.
//!
//! # Command Dialect
//!
//! Used only for guard command rules. Command lines are free text, so `*`
//! and `?` are not restricted by `/`.
//!
//! # Failing Closed
//!
//! A pattern that cannot be compiled never matches. Guard rules are security
//! relevant, so a broken rule must not turn into an accidental allow.

use regex::Regex;
use std::borrow::Cow;

/// Pattern dialect to compile a glob with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Path-like values where `/` is a separator.
    #[default]
    Path,

    /// Free text command lines.
    Command,
}

impl Dialect {
    fn star(self) -> &'static str {
        match self {
            Self::Path => "[^/]*",
            Self::Command => ".*",
        }
    }

    fn question(self) -> &'static str {
        match self {
            Self::Path => "[^/]",
            Self::Command => ".",
        }
    }

    fn normalize(self, value: &str) -> Cow<'_, str> {
        match self {
            Self::Path if value.contains('\\') => Cow::Owned(value.replace('\\', "/")),
            _ => Cow::Borrowed(value),
        }
    }
}

/// Match value against pattern using given dialect.
///
/// Returns true without compiling anything if the trimmed pattern equals the
/// trimmed value. Returns false if the pattern cannot be compiled.
pub fn matches(dialect: Dialect, pattern: &str, value: &str) -> bool {
    let pattern = dialect.normalize(pattern.trim());
    let value = dialect.normalize(value.trim());
    if pattern == value {
        return true;
    }

    let matched = compile(dialect, &pattern)
        .map(|expr| expr.is_match(&value))
        .unwrap_or(false);
    if matched {
        return true;
    }

    // INVARIANT: Leading "**/" also covers bare values.
    dialect == Dialect::Path
        && !value.contains('/')
        && pattern
            .strip_prefix("**/")
            .is_some_and(|rest| matches(dialect, rest, &value))
}

/// Match value against path dialect pattern.
pub fn matches_path(pattern: &str, value: &str) -> bool {
    matches(Dialect::Path, pattern, value)
}

/// Match value against command dialect pattern.
pub fn matches_command(pattern: &str, value: &str) -> bool {
    matches(Dialect::Command, pattern, value)
}

/// Check if any pattern in listing matches value.
///
/// Blank patterns are skipped, so an empty or whitespace-only entry in a
/// configuration file never matches anything.
pub fn any_match(
    dialect: Dialect,
    patterns: impl IntoIterator<Item = impl AsRef<str>>,
    value: &str,
) -> bool {
    patterns
        .into_iter()
        .filter(|pattern| !pattern.as_ref().trim().is_empty())
        .any(|pattern| matches(dialect, pattern.as_ref(), value))
}

/// Compile glob pattern into anchored regular expression.
///
/// No trimming or slash normalization is done here, that is the job of
/// [`matches`].
///
/// # Errors
///
/// - Return [`regex::Error`] if the resulting expression is rejected.
pub fn compile(dialect: Dialect, pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                expr.push_str(".*");
            }
            '*' => expr.push_str(dialect.star()),
            '?' => expr.push_str(dialect.question()),
            _ => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            }
        }
    }

    expr.push('$');
    Regex::new(&expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("foo*", "foobar", true; "star suffix")]
    #[test_case("foo?", "fooa", true; "question one char")]
    #[test_case("foo?", "foo", false; "question needs a char")]
    #[test_case("**/bar", "foo/bar", true; "double star prefix")]
    #[test_case("**/bar", "bar", true; "double star prefix bare value")]
    #[test_case("**/bar", "foo/baz", false; "double star prefix miss")]
    #[test_case("a/**/b", "a/x/y/b", true; "double star crosses separator")]
    #[test_case("a/*/b", "a/x/y/b", false; "single star stops at separator")]
    #[test_case("a/*/b", "a/x/b", true; "single star one segment")]
    #[test_case("a?c", "a/c", false; "question stops at separator")]
    #[test_case("**/*", "top.md", true; "default include covers top level")]
    #[test_case("**/*", "deep/nested/file.md", true; "default include covers nested")]
    #[test_case(".git/**", ".git/HEAD", true; "dot is literal")]
    #[test_case(".git/**", "xgit/HEAD", false; "dot is not any char")]
    #[test_case("a+b(c)", "a+b(c)", true; "metacharacters literal")]
    #[test_case("a+b*", "aab", false; "plus is not repetition")]
    #[test_case("Foo", "foo", false; "case sensitive")]
    #[test]
    fn path_dialect(pattern: &str, value: &str, expect: bool) {
        pretty_assertions::assert_eq!(matches_path(pattern, value), expect);
    }

    #[test_case("git status*", "git status --porcelain", true; "star prefix")]
    #[test_case("rm -rf*", "rm -rf /tmp/x", true; "star crosses slash")]
    #[test_case("code *", "code ./src/main.rs", true; "star any text")]
    #[test_case("git ?ull", "git pull", true; "question any char")]
    #[test_case("git push*", "git pull", false; "miss")]
    #[test_case("echo [x]*", "echo [x] y", true; "brackets literal")]
    #[test_case("echo [x]*", "echo x", false; "brackets are not a class")]
    #[test]
    fn command_dialect(pattern: &str, value: &str, expect: bool) {
        pretty_assertions::assert_eq!(matches_command(pattern, value), expect);
    }

    #[test]
    fn dialects_differ_on_separator() {
        assert!(!matches_path("cat *", "cat a/b"));
        assert!(matches_command("cat *", "cat a/b"));
    }

    #[test]
    fn exact_match_after_trim_and_normalize() {
        assert!(matches_path("  a/b.txt ", "a/b.txt"));
        assert!(matches_path("a\\b.txt", "a/b.txt"));
        assert!(matches_command(" ls -la ", "ls -la"));
    }

    #[test]
    fn any_match_skips_blank_patterns() {
        assert!(any_match(Dialect::Path, ["foo*", "bar"], "foobar"));
        assert!(!any_match(Dialect::Path, ["foo*", "bar"], "baz"));
        assert!(!any_match(Dialect::Path, ["", "   "], "   "));
        assert!(!any_match(Dialect::Path, Vec::<String>::new(), "anything"));
    }

    #[test]
    fn compile_is_anchored() -> anyhow::Result<()> {
        let expr = compile(Dialect::Path, "*.md")?;
        assert_eq!(expr.as_str(), "^[^/]*\\.md$");
        assert!(!expr.is_match("README.md.bak"));

        Ok(())
    }
}
