use std::borrow::Cow;

use regex::Regex;

/// Ordered, append-only set of path patterns whose requests are not logged.
///
/// Patterns use [`regex`] syntax and match anywhere in the path unless they
/// anchor themselves (`^/health`).
///
/// # Examples
/// ```rust
/// use actix_web_middleware_proxylog::IgnoreSet;
///
/// let ignores = IgnoreSet::from_patterns([r"^/health", r"\.(css|js)$"]).unwrap();
/// assert!(ignores.is_ignored("/health/live"));
/// assert!(ignores.is_ignored("/static/app.js"));
/// assert!(!ignores.is_ignored("/api/users"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Regex>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        IgnoreSet {
            patterns: Vec::new(),
        }
    }

    /// Builds a set from a configured list of patterns, failing on the first
    /// one that does not compile.
    pub fn from_patterns<I, T>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut set = IgnoreSet::new();
        for pattern in patterns {
            set.add(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Compiles `pattern` and appends it to the set.
    pub fn add(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Returns `true` if any pattern matches `path`.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    /// Like [`is_ignored`](Self::is_ignored), for a path as it appears on the
    /// wire. Percent-escapes are decoded first, so `/he%61lth` matches
    /// `^/health`. Escapes that decode to invalid UTF-8 become U+FFFD.
    pub fn is_ignored_raw(&self, raw_path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let decoded = urlencoding::decode_binary(raw_path.as_bytes());
        let path = match decoded {
            Cow::Borrowed(_) => Cow::Borrowed(raw_path),
            Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
        };
        self.is_ignored(&path)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
