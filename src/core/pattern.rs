//! Glob-style matching for pattern deletes.
//!
//! `*` matches any run of characters, `/` included, so a bare `*` addresses
//! every staged file. `?` matches one character and `[...]` / `[!...]` are
//! character classes. Anything else is literal.

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::InvalidPattern("pattern must not be empty".to_string()));
        }

        let mut expr = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    while chars.peek() == Some(&'*') {
                        chars.next();
                    }
                    expr.push_str(".*");
                }
                '?' => expr.push('.'),
                '[' => {
                    let mut class = String::new();
                    let mut closed = false;
                    if chars.peek() == Some(&'!') {
                        chars.next();
                        class.push('^');
                    }
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        if matches!(c, '\\' | '[' | '^' | '&' | '~') {
                            class.push('\\');
                        }
                        class.push(c);
                    }
                    if !closed || class.is_empty() || class == "^" {
                        return Err(Error::InvalidPattern(format!(
                            "{}: unterminated or empty character class",
                            pattern
                        )));
                    }
                    expr.push('[');
                    expr.push_str(&class);
                    expr.push(']');
                }
                c => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| Error::InvalidPattern(format!("{}: {}", pattern, e)))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
