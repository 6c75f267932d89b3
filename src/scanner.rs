use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::Result;
use crate::ignore::IgnoreFilter;
use crate::metadata::METADATA_DIR;

#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub path: String,
    pub is_directory: bool,
    pub mtime: DateTime<Utc>,
}

/// C4 — depth-first walk of the install root producing (path,
/// is_directory, mtime) tuples. Skips the hidden metadata directory
/// unconditionally and any entry matching the active [`IgnoreFilter`].
/// Symlinks are not followed; an unresolved link is skipped and logged at
/// warn level (spec §4.4).
pub struct LocalScanner;

impl LocalScanner {
    pub fn scan(root: &Path, filters: &IgnoreFilter) -> Result<Vec<ScannedEntry>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != METADATA_DIR)
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    crate::logging::warn(format!("scan error: {err}"));
                    continue;
                }
            };

            let path = entry.path();
            let rel = match path.strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel_slash = to_slash(rel);

            if filters.is_ignored(&rel_slash) {
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                match fs_metadata_follow(path) {
                    Some(meta) => {
                        out.push(ScannedEntry {
                            path: rel_slash,
                            is_directory: meta.is_dir(),
                            mtime: mtime_of(&meta),
                        });
                    }
                    None => {
                        crate::logging::warn(format!(
                            "skipping unresolved symlink: {}",
                            path.display()
                        ));
                    }
                }
                continue;
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    crate::logging::warn(format!("stat error for {}: {err}", path.display()));
                    continue;
                }
            };

            out.push(ScannedEntry {
                path: rel_slash,
                is_directory: file_type.is_dir(),
                mtime: mtime_of(&meta),
            });
        }

        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }
}

fn fs_metadata_follow(path: &Path) -> Option<std::fs::Metadata> {
    std::fs::metadata(path).ok()
}

fn mtime_of(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::SystemTime as StdSystemTime;

    fn make_temp_dir() -> std::path::PathBuf {
        let mut root = std::env::temp_dir();
        let nanos = StdSystemTime::now()
            .duration_since(StdSystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        root.push(format!("scriptrepo-scanner-test-{nanos}"));
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn empty_root_yields_no_entries() {
        let root = make_temp_dir();
        let filters = IgnoreFilter::default_filter();
        let out = LocalScanner::scan(&root, &filters).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn scan_collects_files_and_directories() {
        let root = make_temp_dir();
        fs::create_dir_all(root.join("inel")).unwrap();
        fs::write(root.join("inel/a.py"), b"print(1)").unwrap();
        fs::write(root.join("README"), b"hi").unwrap();

        let filters = IgnoreFilter::default_filter();
        let out = LocalScanner::scan(&root, &filters).unwrap();
        let paths: Vec<_> = out.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"README"));
        assert!(paths.contains(&"inel"));
        assert!(paths.contains(&"inel/a.py"));
    }

    #[test]
    fn metadata_directory_is_skipped() {
        let root = make_temp_dir();
        fs::create_dir_all(root.join(METADATA_DIR)).unwrap();
        fs::write(root.join(METADATA_DIR).join("repository.json"), b"{}").unwrap();

        let filters = IgnoreFilter::default_filter();
        let out = LocalScanner::scan(&root, &filters).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn ignored_entries_are_skipped() {
        let root = make_temp_dir();
        fs::write(root.join("a.pyc"), b"x").unwrap();
        fs::write(root.join("a.py"), b"x").unwrap();

        let filters = IgnoreFilter::default_filter();
        let out = LocalScanner::scan(&root, &filters).unwrap();
        let paths: Vec<_> = out.iter().map(|e| e.path.as_str()).collect();
        assert!(!paths.contains(&"a.pyc"));
        assert!(paths.contains(&"a.py"));
    }
}
