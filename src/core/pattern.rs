//! Glob patterns for watch bindings and copy tasks.
//!
//! Patterns are written relative to the project root with `/` separators and
//! matched with gitignore-style globs from the `ignore` crate, always
//! anchored at the root:
//!
//! - `*` matches within one path segment
//! - `**` matches across segments (`a/**/b` also matches `a/b`)
//! - `?` matches one character within a segment
//! - `[abc]`, `[a-z]`, `[!abc]` match character classes
//! - `{md,markdown,html}` matches any alternative

use std::path::{Component, Path, PathBuf};

use ignore::overrides::{Override, OverrideBuilder};

use crate::error::{Error, Result};

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    matcher: Override,
    base: PathBuf,
}

impl GlobPattern {
    /// Compile a glob pattern.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPattern`] for malformed globs (unbalanced `[`
    /// or `{`) and for a leading `!` or `#`, which gitignore syntax would
    /// read as negation or a comment.
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches("./").trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(invalid(pattern, "empty pattern"));
        }
        if trimmed.starts_with(['!', '#']) {
            return Err(invalid(pattern, "cannot start with '!' or '#'"));
        }

        let mut builder = OverrideBuilder::new(".");
        builder
            .add(&format!("/{}", trimmed))
            .map_err(|e| invalid(pattern, &e.to_string()))?;
        let matcher = builder
            .build()
            .map_err(|e| invalid(pattern, &e.to_string()))?;

        Ok(Self {
            raw: pattern.to_string(),
            matcher,
            base: literal_base(trimmed),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The longest leading directory of the pattern free of glob syntax.
    ///
    /// `src/assets/styles/**/*.scss` has base `src/assets/styles`; a pattern
    /// without wildcards (`bower.json`) has its parent directory as base.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// How many directory levels below [`base`](Self::base) a match can sit,
    /// or `None` when the pattern uses `**`.
    pub fn depth_limit(&self) -> Option<usize> {
        let trimmed = self.raw.trim_start_matches("./");
        if trimmed.contains("**") {
            return None;
        }
        let segments = trimmed.split('/').filter(|s| !s.is_empty()).count();
        Some(segments - self.base.components().count())
    }

    /// Match a file path relative to the project root.
    pub fn is_match(&self, relative: &Path) -> bool {
        self.is_match_str(&normalize(relative))
    }

    pub fn is_match_str(&self, relative: &str) -> bool {
        let relative = relative.trim_start_matches("./");
        !relative.is_empty() && self.matcher.matched(relative, false).is_whitelist()
    }

    /// Whether a pattern string uses any glob syntax.
    pub fn has_magic(pattern: &str) -> bool {
        pattern.contains(['*', '?', '[', '{'])
    }
}

fn invalid(pattern: &str, reason: &str) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

/// Join the normal components of `path` with `/`.
pub fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn literal_base(pattern: &str) -> PathBuf {
    let segments: Vec<&str> = pattern.split('/').collect();
    let magic_at = segments.iter().position(|s| GlobPattern::has_magic(s));
    let literal = match magic_at {
        Some(i) => &segments[..i],
        // No wildcards: the pattern names a file, watch its directory.
        None => &segments[..segments.len().saturating_sub(1)],
    };
    literal.iter().filter(|s| !s.is_empty()).collect()
}
