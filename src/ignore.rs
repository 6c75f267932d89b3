use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{RepoError, Result};

/// Patterns hidden by default, same spirit as the teacher's
/// `filters::DEFAULT_IGNORE_LINES`: byte-compiled artifacts and hidden
/// files/directories.
pub const DEFAULT_PATTERNS: &str = "*.pyc;.*";

/// C2 — compiles a `;`-separated glob pattern list into a matcher tested
/// against both the entry's last path component and its full relative
/// path. A failed compile keeps the previous matcher (spec §4.2).
#[derive(Clone)]
pub struct IgnoreFilter {
    raw: String,
    set: GlobSet,
}

impl IgnoreFilter {
    pub fn new(patterns: &str) -> Result<Self> {
        let set = compile(patterns)?;
        Ok(Self {
            raw: patterns.to_string(),
            set,
        })
    }

    pub fn default_filter() -> Self {
        Self::new(DEFAULT_PATTERNS).expect("default patterns must compile")
    }

    pub fn patterns(&self) -> &str {
        &self.raw
    }

    /// Recompile with `patterns`, keeping the existing matcher on failure.
    pub fn set_patterns(&mut self, patterns: &str) -> Result<()> {
        let set = compile(patterns)?;
        self.raw = patterns.to_string();
        self.set = set;
        Ok(())
    }

    /// True if `rel_path` (repository-relative, `/`-separated) should be
    /// hidden from listings.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if self.set.is_match(rel_path) {
            return true;
        }
        let last = Path::new(rel_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        match last {
            Some(last) => self.set.is_match(&last),
            None => false,
        }
    }
}

fn compile(patterns: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for raw in patterns.split(';') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let glob = Glob::new(raw).map_err(|e| RepoError::BadPattern {
            patterns: patterns.to_string(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| RepoError::BadPattern {
        patterns: patterns.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hides_pyc_and_hidden_files() {
        let f = IgnoreFilter::default_filter();
        assert!(f.is_ignored("pkg/module.pyc"));
        assert!(f.is_ignored(".DS_Store"));
        assert!(f.is_ignored("pkg/.hidden"));
        assert!(!f.is_ignored("pkg/module.py"));
    }

    #[test]
    fn matches_full_relative_path_or_last_component() {
        let f = IgnoreFilter::new("build/*").unwrap();
        assert!(f.is_ignored("build/out.txt"));
        assert!(!f.is_ignored("nested/build/out.txt"));
    }

    #[test]
    fn bad_pattern_keeps_previous_matcher() {
        let mut f = IgnoreFilter::new("*.pyc").unwrap();
        let err = f.set_patterns("[").unwrap_err();
        assert!(matches!(err, RepoError::BadPattern { .. }));
        assert!(f.is_ignored("a.pyc"));
        assert_eq!(f.patterns(), "*.pyc");
    }

    #[test]
    fn semicolon_separated_patterns_all_apply() {
        let f = IgnoreFilter::new("*.pyc;*.tmp;.git").unwrap();
        assert!(f.is_ignored("a.pyc"));
        assert!(f.is_ignored("a.tmp"));
        assert!(f.is_ignored(".git"));
        assert!(!f.is_ignored("a.py"));
    }
}
