//! Header text to link-fragment normalization.
//!
//! A slug is what a fragment link (`"see":doc#getting-started`) is compared
//! against. Slugging lowercases the text, drops punctuation, and joins the
//! remaining words with single dashes. Unicode letters and digits survive.

use std::fmt;

/// A normalized identifier derived from header text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Slug(String);

impl Slug {
    /// Slugs `text` as it would appear in a header.
    pub fn from_heading(text: &str) -> Slug {
        let mut value = String::with_capacity(text.len());
        let mut pending_separator = false;

        for c in text.chars().flat_map(char::to_lowercase) {
            if c.is_whitespace() || c == '-' {
                pending_separator = !value.is_empty();
            } else if c.is_alphanumeric() || c == '_' {
                if pending_separator {
                    value.push('-');
                    pending_separator = false;
                }
                value.push(c);
            }
        }

        Slug(value)
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison on the normalized value.
    pub fn matches(&self, other: &Slug) -> bool {
        self.0.to_lowercase() == other.0.to_lowercase()
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shorthand for [`Slug::from_heading`].
pub fn slugify(text: &str) -> Slug {
    Slug::from_heading(text)
}
