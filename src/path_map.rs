use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::{RepoError, Result};

/// C1 — normalizes user-supplied paths into repository-relative,
/// forward-slash keys.
///
/// Mirrors the teacher's `config::absolutize_path`/`expand_tilde`/
/// `clean_lexical` trio, repurposed from "make an absolute path" to "strip
/// the install root and flatten separators".
#[derive(Clone, Debug)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert `input` to a repository-relative, `/`-separated key.
    ///
    /// Absolute paths outside the root are returned unchanged (the caller
    /// treats the result as non-local by checking `Path::is_absolute` on
    /// the output, same as the original's "outside root -> unchanged"
    /// rule).
    pub fn to_repo_key(&self, input: &str) -> Result<String> {
        if input.is_empty() {
            return Err(RepoError::InvalidPath {
                path: input.to_string(),
                reason: "empty path".to_string(),
            });
        }

        let expanded = expand_tilde(Path::new(input));

        if expanded.is_absolute() {
            let cleaned = clean_lexical(&expanded);
            return match cleaned.strip_prefix(&self.root) {
                Ok(rel) => self.finish(rel, input),
                Err(_) => Ok(to_slash(&cleaned)),
            };
        }

        self.finish(&expanded, input)
    }

    fn finish(&self, rel: &Path, original: &str) -> Result<String> {
        let cleaned = clean_relative(rel, original)?;
        Ok(to_slash(&cleaned))
    }
}

fn clean_relative(rel: &Path, original: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth: i64 = 0;
    for component in rel.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(RepoError::InvalidPath {
                        path: original.to_string(),
                        reason: "escapes repository root via '..'".to_string(),
                    });
                }
                out.pop();
            }
            Component::Normal(p) => {
                depth += 1;
                out.push(p);
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(RepoError::InvalidPath {
                    path: original.to_string(),
                    reason: "unexpected root component in relative path".to_string(),
                });
            }
        }
    }
    Ok(out)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(c)) if c == OsStr::new("~") => {
            let mut out = home_dir();
            for c in components {
                out.push(c.as_os_str());
            }
            out
        }
        _ => path.to_path_buf(),
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn clean_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(p) => out.push(p),
        }
    }
    out
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

    #[test]
    fn relative_paths_pass_through_normalized() {
        let mapper = PathMapper::new("/home/user/repo");
        assert_eq!(mapper.to_repo_key("a/b.py").unwrap(), "a/b.py");
        assert_eq!(mapper.to_repo_key("./a/b.py").unwrap(), "a/b.py");
    }

    #[test]
    fn absolute_paths_under_root_are_stripped() {
        let mapper = PathMapper::new("/home/user/repo");
        assert_eq!(
            mapper.to_repo_key("/home/user/repo/a/b.py").unwrap(),
            "a/b.py"
        );
    }

    #[test]
    fn absolute_paths_outside_root_are_unchanged() {
        let mapper = PathMapper::new("/home/user/repo");
        let out = mapper.to_repo_key("/etc/passwd").unwrap();
        assert_eq!(out, "/etc/passwd");
    }

    #[test]
    fn empty_path_is_invalid() {
        let mapper = PathMapper::new("/home/user/repo");
        assert!(matches!(
            mapper.to_repo_key(""),
            Err(RepoError::InvalidPath { .. })
        ));
    }

    #[test]
    fn traversal_outside_root_is_invalid() {
        let mapper = PathMapper::new("/home/user/repo");
        assert!(matches!(
            mapper.to_repo_key("../../etc/passwd"),
            Err(RepoError::InvalidPath { .. })
        ));
    }

    #[test]
    fn idempotent_on_already_normalized_input() {
        let mapper = PathMapper::new("/home/user/repo");
        let once = mapper.to_repo_key("a/b/c.py").unwrap();
        let twice = mapper.to_repo_key(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn internal_parent_dir_within_relative_path_is_resolved() {
        let mapper = PathMapper::new("/home/user/repo");
        assert_eq!(mapper.to_repo_key("a/../b.py").unwrap(), "b.py");
    }
}
