use crate::error::{CounterError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Display;

const MAX_KEY_LEN: usize = 512;

lazy_static! {
    static ref REPEATED_SLASH: Regex = Regex::new("/{2,}").unwrap();
}

/// Canonical identifier of a counted resource.
///
/// Different spellings of the same page path map to a single key, so
/// `home/`, `/home` and `//home?ref=mail` all share one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey(String);

impl PageKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        // query and fragment never identify a different page
        let path = trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim();

        if path.is_empty() {
            return Err(CounterError::InvalidKey(format!(
                "`{raw}` is empty after normalization"
            )));
        }

        let mut normalized = REPEATED_SLASH
            .replace_all(&format!("/{path}"), "/")
            .into_owned();
        if normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }

        if normalized.len() > MAX_KEY_LEN {
            return Err(CounterError::InvalidKey(format!(
                "key is {} bytes long, limit is {MAX_KEY_LEN}",
                normalized.len()
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[test]
fn test_normalize_paths() {
    let cases = [
        ("/home", "/home"),
        ("home", "/home"),
        ("/home/", "/home"),
        ("  //home///page?ref=mail#top ", "/home/page"),
        ("/", "/"),
        ("///", "/"),
        ("/About", "/About"),
        ("article-42", "/article-42"),
    ];

    for (raw, expect) in cases {
        assert_eq!(PageKey::parse(raw).unwrap().as_str(), expect, "input: {raw:?}");
    }
}

#[test]
fn test_reject_empty_and_long_keys() {
    for raw in ["", "   ", "?x=1", "#frag"] {
        assert!(matches!(
            PageKey::parse(raw),
            Err(CounterError::InvalidKey(_))
        ));
    }

    let long = "a".repeat(MAX_KEY_LEN + 1);
    assert!(matches!(
        PageKey::parse(&long),
        Err(CounterError::InvalidKey(_))
    ));
}
