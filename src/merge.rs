use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::RepoError;
use crate::ignore::IgnoreFilter;
use crate::metadata::{DownloadedRecord, LocalRecord, RemoteRecord};
use crate::scanner::ScannedEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BothUnchanged,
    RemoteOnly,
    LocalOnly,
    RemoteChanged,
    LocalChanged,
    /// Bitwise union of `RemoteChanged` and `LocalChanged`.
    BothChanged,
}

impl Status {
    pub fn is_downloadable(self) -> bool {
        matches!(self, Status::RemoteOnly | Status::RemoteChanged | Status::BothChanged)
    }

    pub fn is_uploadable(self) -> bool {
        !matches!(self, Status::BothChanged)
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub is_directory: bool,
    pub present_remote: bool,
    pub present_local: bool,
    pub remote_pub_date: Option<DateTime<Utc>>,
    pub local_mtime: Option<DateTime<Utc>>,
    pub downloaded_pub_date: Option<DateTime<Utc>>,
    pub downloaded_local_mtime: Option<DateTime<Utc>>,
    pub description: String,
    pub author: String,
    pub auto_update: bool,
    pub status: Status,
}

impl Entry {
    fn blank(path: String) -> Self {
        Self {
            path,
            is_directory: false,
            present_remote: false,
            present_local: false,
            remote_pub_date: None,
            local_mtime: None,
            downloaded_pub_date: None,
            downloaded_local_mtime: None,
            description: String::new(),
            author: String::new(),
            auto_update: false,
            status: Status::BothUnchanged,
        }
    }
}

/// C6 — pure reconciliation of the four persisted/scanned views into the
/// unified entry set, computing `status` per the file table in §3 and the
/// bottom-up directory fold, then applying the ignore overlay last (the
/// remote catalog is authoritative over ignores).
///
/// Returns the entry set plus any non-fatal shape conflicts observed.
pub fn merge(
    remote: &std::collections::HashMap<String, RemoteRecord>,
    scan: &[ScannedEntry],
    downloaded: &std::collections::HashMap<String, DownloadedRecord>,
    local: &std::collections::HashMap<String, LocalRecord>,
    filters: &IgnoreFilter,
) -> (BTreeMap<String, Entry>, Vec<RepoError>) {
    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
    let mut warnings = Vec::new();

    for (path, rec) in remote {
        let entry = entries
            .entry(path.clone())
            .or_insert_with(|| Entry::blank(path.clone()));
        entry.present_remote = true;
        entry.is_directory = rec.directory;
        entry.remote_pub_date = Some(rec.pub_date);
        entry.description = rec.description.clone();
        entry.author = rec.author.clone();
    }

    for scanned in scan {
        let entry = entries
            .entry(scanned.path.clone())
            .or_insert_with(|| Entry::blank(scanned.path.clone()));
        if entry.present_remote && entry.is_directory != scanned.is_directory {
            warnings.push(RepoError::ShapeConflict {
                path: scanned.path.clone(),
            });
            entry.present_local = true;
            entry.local_mtime = Some(scanned.mtime);
            entry.status = Status::BothChanged;
            continue;
        }
        entry.present_local = true;
        entry.is_directory = scanned.is_directory;
        entry.local_mtime = Some(scanned.mtime);
    }

    synthesize_ancestor_directories(&mut entries);

    for (path, rec) in downloaded {
        if let Some(entry) = entries.get_mut(path) {
            entry.downloaded_pub_date = Some(rec.downloaded_pub_date);
            entry.downloaded_local_mtime = Some(rec.downloaded_local_mtime);
        }
    }

    for (path, rec) in local {
        if let Some(entry) = entries.get_mut(path) {
            entry.auto_update = rec.auto_update;
        }
    }

    let file_paths: Vec<String> = entries
        .values()
        .filter(|e| !e.is_directory)
        .map(|e| e.path.clone())
        .collect();
    for path in file_paths {
        let entry = entries.get_mut(&path).unwrap();
        if entry.status == Status::BothChanged && !entry.present_remote {
            // already resolved as a shape-conflict entry above
            continue;
        }
        entry.status = file_status(entry);
    }

    fold_directory_statuses(&mut entries);

    entries.retain(|path, entry| entry.present_remote || !filters.is_ignored(path));

    (entries, warnings)
}

fn file_status(entry: &Entry) -> Status {
    match (entry.present_remote, entry.present_local) {
        (true, false) => Status::RemoteOnly,
        (false, true) => Status::LocalOnly,
        (false, false) => Status::BothUnchanged,
        (true, true) => {
            let (downloaded_pub, downloaded_mtime) =
                match (entry.downloaded_pub_date, entry.downloaded_local_mtime) {
                    (Some(p), Some(m)) => (p, m),
                    _ => return Status::LocalChanged,
                };
            let remote_changed = entry
                .remote_pub_date
                .map(|p| p > downloaded_pub)
                .unwrap_or(false);
            let local_changed = entry
                .local_mtime
                .map(|m| m > downloaded_mtime)
                .unwrap_or(false);
            match (remote_changed, local_changed) {
                (false, false) => Status::BothUnchanged,
                (true, false) => Status::RemoteChanged,
                (false, true) => Status::LocalChanged,
                (true, true) => Status::BothChanged,
            }
        }
    }
}

fn synthesize_ancestor_directories(entries: &mut BTreeMap<String, Entry>) {
    let mut ancestors = Vec::new();
    for path in entries.keys() {
        let mut current = path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            ancestors.push(parent.to_string());
            current = parent;
        }
    }
    for path in ancestors {
        entries
            .entry(path.clone())
            .or_insert_with(|| {
                let mut e = Entry::blank(path);
                e.is_directory = true;
                e
            })
            .is_directory = true;
    }
}

/// Bottom-up fold per §3: unanimous unchanged/only statuses propagate
/// as-is; mixed remote- and local-direction children yield BOTH_CHANGED;
/// a single-direction mix yields that direction's "changed" variant.
fn fold_directory_statuses(entries: &mut BTreeMap<String, Entry>) {
    let mut dir_paths: Vec<String> = entries
        .values()
        .filter(|e| e.is_directory)
        .map(|e| e.path.clone())
        .collect();
    dir_paths.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));

    for dir in dir_paths {
        let children: Vec<Status> = entries
            .values()
            .filter(|e| parent_of(&e.path) == Some(dir.as_str()))
            .map(|e| e.status)
            .collect();
        let status = fold_children(&children);
        if let Some(entry) = entries.get_mut(&dir) {
            entry.status = status;
        }
    }
}

fn fold_children(children: &[Status]) -> Status {
    if children.is_empty() {
        return Status::BothUnchanged;
    }
    if children.iter().all(|s| *s == Status::BothUnchanged) {
        return Status::BothUnchanged;
    }
    if children.iter().all(|s| *s == Status::RemoteOnly) {
        return Status::RemoteOnly;
    }
    if children.iter().all(|s| *s == Status::LocalOnly) {
        return Status::LocalOnly;
    }

    let mut remote_direction = false;
    let mut local_direction = false;
    for s in children {
        match s {
            Status::BothUnchanged => {}
            Status::RemoteOnly | Status::RemoteChanged => remote_direction = true,
            Status::LocalOnly | Status::LocalChanged => local_direction = true,
            Status::BothChanged => {
                remote_direction = true;
                local_direction = true;
            }
        }
    }

    if remote_direction && local_direction {
        return Status::BothChanged;
    }
    if remote_direction {
        return Status::RemoteChanged;
    }
    if local_direction {
        return Status::LocalChanged;
    }
    Status::BothUnchanged
}

fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(p, _)| p)
}

/// Re-fold every ancestor of `path` after a single entry's status changes,
/// without re-running the full merge. Cheaper than `merge` for the common
/// case of one file transitioning post-download/upload/remove.
pub(crate) fn refold_ancestors(entries: &mut BTreeMap<String, Entry>, path: &str) {
    let mut current = path.to_string();
    while let Some(parent) = parent_of(&current).map(|p| p.to_string()) {
        let children: Vec<Status> = entries
            .values()
            .filter(|e| parent_of(&e.path) == Some(parent.as_str()))
            .map(|e| e.status)
            .collect();
        let status = fold_children(&children);
        if let Some(entry) = entries.get_mut(&parent) {
            entry.status = status;
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn fresh_install_marks_everything_remote_only() {
        let mut remote = HashMap::new();
        remote.insert(
            "README".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-01-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        remote.insert(
            "inel/a.py".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-02-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let filters = IgnoreFilter::default_filter();
        let (entries, warnings) = merge(&remote, &[], &HashMap::new(), &HashMap::new(), &filters);
        assert!(warnings.is_empty());
        assert_eq!(entries["README"].status, Status::RemoteOnly);
        assert_eq!(entries["inel/a.py"].status, Status::RemoteOnly);
        assert_eq!(entries["inel"].status, Status::RemoteOnly);
        assert!(entries["inel"].is_directory);
    }

    #[test]
    fn both_sides_present_without_download_record_is_local_changed() {
        let mut remote = HashMap::new();
        remote.insert(
            "mine.py".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-01-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let scan = vec![ScannedEntry {
            path: "mine.py".to_string(),
            is_directory: false,
            mtime: ts("2020-01-02T00:00:00Z"),
        }];
        let filters = IgnoreFilter::default_filter();
        let (entries, _) = merge(&remote, &scan, &HashMap::new(), &HashMap::new(), &filters);
        assert_eq!(entries["mine.py"].status, Status::LocalChanged);
    }

    #[test]
    fn downloaded_and_unchanged_on_both_sides_is_both_unchanged() {
        let mut remote = HashMap::new();
        remote.insert(
            "a.py".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-01-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let scan = vec![ScannedEntry {
            path: "a.py".to_string(),
            is_directory: false,
            mtime: ts("2020-01-01T00:00:00Z"),
        }];
        let mut downloaded = HashMap::new();
        downloaded.insert(
            "a.py".to_string(),
            DownloadedRecord {
                downloaded_pub_date: ts("2020-01-01T00:00:00Z"),
                downloaded_local_mtime: ts("2020-01-01T00:00:00Z"),
            },
        );
        let filters = IgnoreFilter::default_filter();
        let (entries, _) = merge(&remote, &scan, &downloaded, &HashMap::new(), &filters);
        assert_eq!(entries["a.py"].status, Status::BothUnchanged);
    }

    #[test]
    fn remote_bump_after_download_is_remote_changed() {
        let mut remote = HashMap::new();
        remote.insert(
            "a.py".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-03-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let scan = vec![ScannedEntry {
            path: "a.py".to_string(),
            is_directory: false,
            mtime: ts("2020-01-01T00:00:00Z"),
        }];
        let mut downloaded = HashMap::new();
        downloaded.insert(
            "a.py".to_string(),
            DownloadedRecord {
                downloaded_pub_date: ts("2020-01-01T00:00:00Z"),
                downloaded_local_mtime: ts("2020-01-01T00:00:00Z"),
            },
        );
        let filters = IgnoreFilter::default_filter();
        let (entries, _) = merge(&remote, &scan, &downloaded, &HashMap::new(), &filters);
        assert_eq!(entries["a.py"].status, Status::RemoteChanged);
    }

    #[test]
    fn shape_conflict_is_flagged_and_surfaced_as_both_changed() {
        let mut remote = HashMap::new();
        remote.insert(
            "weird".to_string(),
            RemoteRecord {
                directory: true,
                pub_date: ts("2020-01-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let scan = vec![ScannedEntry {
            path: "weird".to_string(),
            is_directory: false,
            mtime: ts("2020-01-01T00:00:00Z"),
        }];
        let filters = IgnoreFilter::default_filter();
        let (entries, warnings) = merge(&remote, &scan, &HashMap::new(), &HashMap::new(), &filters);
        assert_eq!(entries["weird"].status, Status::BothChanged);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], RepoError::ShapeConflict { .. }));
    }

    #[test]
    fn ignored_local_only_entry_is_dropped_but_remote_wins() {
        let mut remote = HashMap::new();
        remote.insert(
            "a.pyc".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: ts("2020-01-01T00:00:00Z"),
                description: String::new(),
                author: String::new(),
            },
        );
        let scan = vec![ScannedEntry {
            path: "b.pyc".to_string(),
            is_directory: false,
            mtime: ts("2020-01-01T00:00:00Z"),
        }];
        let filters = IgnoreFilter::default_filter();
        let (entries, _) = merge(&remote, &scan, &HashMap::new(), &HashMap::new(), &filters);
        assert!(entries.contains_key("a.pyc"));
        assert!(!entries.contains_key("b.pyc"));
    }

    #[test]
    fn mixed_direction_children_yield_both_changed() {
        assert_eq!(
            fold_children(&[Status::RemoteOnly, Status::LocalOnly]),
            Status::BothChanged
        );
        assert_eq!(
            fold_children(&[Status::RemoteOnly, Status::RemoteChanged]),
            Status::RemoteChanged
        );
        assert_eq!(
            fold_children(&[Status::BothUnchanged, Status::BothUnchanged]),
            Status::BothUnchanged
        );
    }
}
