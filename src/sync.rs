use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{RepoError, Result};
use crate::ignore::IgnoreFilter;
use crate::install::Installer;
use crate::merge::{merge, refold_ancestors, Entry, Status};
use crate::metadata::{DownloadedRecord, Kind, LocalRecord, MetadataStore};
use crate::path_map::PathMapper;
use crate::remote::RemoteCatalogClient;
use crate::scanner::LocalScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Download,
    Upload,
    Delete,
    CheckUpdate,
}

#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub author: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub auto_update: bool,
    pub is_directory: bool,
}

struct SyncState {
    remote: RemoteCatalogClient,
    store: MetadataStore,
    filters: IgnoreFilter,
    entries: BTreeMap<String, Entry>,
    actions: std::collections::HashMap<String, ActionKind>,
    checking_update: bool,
}

/// C7 — the public surface. A single coarse `tokio::sync::Mutex` guards the
/// entry set, the action table, and the in-memory sidecar views (spec §5).
/// `list_files`/`check4update` hold it across their full duration,
/// including the remote fetch; `download`/`upload`/`remove` release it for
/// the blocking HTTP/filesystem phase and reacquire it only to commit.
pub struct Synchronizer {
    root: PathBuf,
    mapper: PathMapper,
    state: Mutex<SyncState>,
}

impl Synchronizer {
    pub fn new(root: PathBuf, remote: RemoteCatalogClient) -> Result<Self> {
        let store = MetadataStore::load(&root)?;
        let filters = IgnoreFilter::new(&store.config.ignore_patterns)?;
        let mapper = PathMapper::new(root.clone());
        Ok(Self {
            root,
            mapper,
            state: Mutex::new(SyncState {
                remote,
                store,
                filters,
                entries: BTreeMap::new(),
                actions: std::collections::HashMap::new(),
                checking_update: false,
            }),
        })
    }

    /// Idempotent creation of `root` and its metadata subdirectory, default
    /// ignore patterns, and an initial `repository.json` fetched from the
    /// remote. Refuses to clobber an existing install unless `force`.
    pub async fn install(root: PathBuf, remote: RemoteCatalogClient, force: bool) -> Result<Self> {
        let store = Installer::install(&root, &remote, force).await?;
        let filters = IgnoreFilter::new(&store.config.ignore_patterns)?;
        let mapper = PathMapper::new(root.clone());
        Ok(Self {
            root,
            mapper,
            state: Mutex::new(SyncState {
                remote,
                store,
                filters,
                entries: BTreeMap::new(),
                actions: std::collections::HashMap::new(),
                checking_update: false,
            }),
        })
    }

    /// True iff the install root exists, all sidecars are loadable, and a
    /// catalog URL is configured. No remote I/O.
    pub async fn is_valid(&self) -> bool {
        if !self.root.exists() || MetadataStore::load(&self.root).is_err() {
            return false;
        }
        let state = self.state.lock().await;
        !state.remote.catalog_url().is_empty()
    }

    /// Override the catalog URL for the session. Pure setter.
    pub async fn connect(&self, url: Option<String>) {
        if let Some(url) = url {
            let mut state = self.state.lock().await;
            state.remote.set_catalog_url(url);
        }
    }

    /// Rescans the local filesystem, refetches the remote catalog, and
    /// recomputes the whole entry set. The only operation that does so;
    /// everything else reads the cached result.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let catalog = state.remote.fetch_catalog().await?;
        state.store.repository = catalog;
        state.store.flush(Kind::Repository)?;

        let filters = state.filters.clone();
        let scanned = LocalScanner::scan(&self.root, &filters)?;

        let (entries, warnings) = merge(
            &state.store.repository,
            &scanned,
            &state.store.downloaded,
            &state.store.local,
            &state.filters,
        );
        for w in &warnings {
            crate::logging::warn(format!("{w}"));
        }
        state.entries = entries;
        Ok(state.entries.keys().cloned().collect())
    }

    pub async fn info(&self, path: &str) -> Result<EntryInfo> {
        let path = self.mapper.to_repo_key(path)?;
        let state = self.state.lock().await;
        let entry = lookup(&state.entries, &path)?;
        Ok(EntryInfo {
            author: entry.author.clone(),
            pub_date: entry.remote_pub_date,
            auto_update: entry.auto_update,
            is_directory: entry.is_directory,
        })
    }

    pub async fn description(&self, path: &str) -> Result<String> {
        let path = self.mapper.to_repo_key(path)?;
        let state = self.state.lock().await;
        Ok(lookup(&state.entries, &path)?.description.clone())
    }

    pub async fn file_status(&self, path: &str) -> Result<Status> {
        let path = self.mapper.to_repo_key(path)?;
        let state = self.state.lock().await;
        Ok(lookup(&state.entries, &path)?.status)
    }

    /// §4.7.1. For a file, downloads directly. For a directory, recurses
    /// depth-first over every present-remote descendant file, collecting
    /// per-descendant failures instead of aborting. A failure at the
    /// top-level file call propagates directly (so a single-file `BUSY`,
    /// say, is still observable as `Err`).
    pub async fn download(&self, path: &str) -> Result<Vec<RepoError>> {
        let path = self.mapper.to_repo_key(path)?;
        let is_directory = {
            let state = self.state.lock().await;
            lookup(&state.entries, &path)?.is_directory
        };

        if !is_directory {
            return match self.download_one(&path).await {
                Ok(()) => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }

        let descendants = {
            let state = self.state.lock().await;
            let prefix = format!("{path}/");
            let mut targets: Vec<String> = state
                .entries
                .values()
                .filter(|e| !e.is_directory && e.present_remote && e.path.starts_with(&prefix))
                .map(|e| e.path.clone())
                .collect();
            targets.sort();
            targets
        };

        let mut errors = Vec::new();
        for target in descendants {
            if let Err(e) = self.download_one(&target).await {
                errors.push(e);
            }
        }
        Ok(errors)
    }

    async fn download_one(&self, path: &str) -> Result<()> {
        let (remote, dest, backup, pub_date) = {
            let mut state = self.state.lock().await;
            let entry = lookup(&state.entries, path)?;
            if !entry.present_remote {
                return Err(RepoError::NotFound {
                    path: path.to_string(),
                });
            }
            if let Some(existing) = state.actions.get(path) {
                return Err(RepoError::Busy {
                    path: path.to_string(),
                    kind: *existing,
                });
            }
            let needs_backup = entry.present_local
                && matches!(entry.status, Status::LocalChanged | Status::BothChanged);
            let pub_date = entry.remote_pub_date;
            state.actions.insert(path.to_string(), ActionKind::Download);

            let dest = fs_path(&self.root, path);
            let backup = if needs_backup {
                Some(fs_path(&self.root, &format!("{path}_bck")))
            } else {
                None
            };
            (state.remote.clone(), dest, backup, pub_date)
        };

        let outcome: Result<()> = async {
            if let Some(backup_dest) = &backup {
                if dest.exists() {
                    tokio::fs::copy(&dest, backup_dest).await?;
                }
            }
            remote.download_file(path, &dest).await?;
            Ok(())
        }
        .await;

        let mut state = self.state.lock().await;
        state.actions.remove(path);
        outcome?;

        let local_mtime = tokio::fs::metadata(&dest)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        if let Some(entry) = state.entries.get_mut(path) {
            entry.present_local = true;
            entry.local_mtime = Some(local_mtime);
            entry.downloaded_pub_date = pub_date;
            entry.downloaded_local_mtime = Some(local_mtime);
            entry.status = Status::BothUnchanged;
        }
        state.store.put_downloaded(
            path.to_string(),
            DownloadedRecord {
                downloaded_pub_date: pub_date.unwrap_or_else(Utc::now),
                downloaded_local_mtime: local_mtime,
            },
        );
        state.store.flush(Kind::Downloaded)?;
        refold_ancestors(&mut state.entries, path);
        Ok(())
    }

    /// §4.7.2. Rejects directories (`NOT_SUPPORTED`), empty identity
    /// (`MISSING_IDENTITY`), and a `BOTH_CHANGED` entry (the two sides
    /// disagree in both directions; the caller must download first).
    pub async fn upload(
        &self,
        path: &str,
        comment: &str,
        author: &str,
        email: &str,
    ) -> Result<DateTime<Utc>> {
        if author.is_empty() || email.is_empty() {
            return Err(RepoError::MissingIdentity);
        }
        let path = self.mapper.to_repo_key(path)?;

        let dest = {
            let mut state = self.state.lock().await;
            let entry = lookup(&state.entries, &path)?;
            if entry.is_directory {
                return Err(RepoError::NotSupported { op: "upload" });
            }
            if !entry.present_local {
                return Err(RepoError::NotFound {
                    path: path.clone(),
                });
            }
            if entry.status == Status::BothChanged {
                return Err(RepoError::ShapeConflict { path: path.clone() });
            }
            if let Some(existing) = state.actions.get(&path) {
                return Err(RepoError::Busy {
                    path: path.clone(),
                    kind: *existing,
                });
            }
            state.actions.insert(path.clone(), ActionKind::Upload);
            fs_path(&self.root, &path)
        };

        let outcome: Result<DateTime<Utc>> = async {
            let body = tokio::fs::read(&dest).await?;
            let remote = {
                let state = self.state.lock().await;
                state.remote.clone()
            };
            remote.upload(&path, body, comment, author, email).await
        }
        .await;

        let mut state = self.state.lock().await;
        state.actions.remove(&path);
        let new_pub_date = outcome?;

        let local_mtime = tokio::fs::metadata(&dest)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);

        if let Some(entry) = state.entries.get_mut(&path) {
            entry.present_remote = true;
            entry.remote_pub_date = Some(new_pub_date);
            entry.downloaded_pub_date = Some(new_pub_date);
            entry.downloaded_local_mtime = Some(local_mtime);
            entry.local_mtime = Some(local_mtime);
            entry.author = author.to_string();
            entry.status = Status::BothUnchanged;
        }
        state.store.put_remote(
            path.clone(),
            crate::metadata::RemoteRecord {
                directory: false,
                pub_date: new_pub_date,
                description: String::new(),
                author: author.to_string(),
            },
        );
        state.store.put_downloaded(
            path.clone(),
            DownloadedRecord {
                downloaded_pub_date: new_pub_date,
                downloaded_local_mtime: local_mtime,
            },
        );
        state.store.flush(Kind::Repository)?;
        state.store.flush(Kind::Downloaded)?;
        refold_ancestors(&mut state.entries, &path);
        Ok(new_pub_date)
    }

    /// §4.7.3. Removes the remote entry only; the local file is untouched.
    /// Precondition: status ∈ {LOCAL_CHANGED, BOTH_UNCHANGED} — the caller
    /// must know what they're deleting.
    pub async fn remove(&self, path: &str, comment: &str, author: &str, email: &str) -> Result<()> {
        if author.is_empty() || email.is_empty() {
            return Err(RepoError::MissingIdentity);
        }
        if comment.is_empty() {
            return Err(RepoError::ReasonRequired);
        }
        let path = self.mapper.to_repo_key(path)?;

        {
            let mut state = self.state.lock().await;
            let entry = lookup(&state.entries, &path)?;
            if entry.is_directory {
                return Err(RepoError::NotSupported { op: "remove" });
            }
            if !matches!(entry.status, Status::LocalChanged | Status::BothUnchanged) {
                return Err(RepoError::ShapeConflict { path: path.clone() });
            }
            if let Some(existing) = state.actions.get(&path) {
                return Err(RepoError::Busy {
                    path: path.clone(),
                    kind: *existing,
                });
            }
            state.actions.insert(path.clone(), ActionKind::Delete);
        }

        let remote = {
            let state = self.state.lock().await;
            state.remote.clone()
        };
        let outcome = remote.delete_remote(&path, comment, author, email).await;

        let mut state = self.state.lock().await;
        state.actions.remove(&path);
        outcome?;

        if let Some(entry) = state.entries.get_mut(&path) {
            entry.present_remote = false;
            entry.remote_pub_date = None;
            entry.downloaded_pub_date = None;
            entry.downloaded_local_mtime = None;
            entry.status = if entry.present_local {
                Status::LocalOnly
            } else {
                Status::BothUnchanged
            };
        }
        state.store.delete_remote(&path);
        state.store.delete_downloaded(&path);
        state.store.flush(Kind::Repository)?;
        state.store.flush(Kind::Downloaded)?;
        refold_ancestors(&mut state.entries, &path);
        Ok(())
    }

    /// Refetches the catalog, recomputes the entry set, then downloads
    /// every `auto_update` entry whose status is REMOTE_ONLY/REMOTE_CHANGED.
    /// Returns the materialized paths and any per-entry errors. At most one
    /// check4update runs at a time; a second call fails with `BUSY`.
    pub async fn check4update(&self) -> Result<(Vec<String>, Vec<RepoError>)> {
        {
            let mut state = self.state.lock().await;
            if state.checking_update {
                return Err(RepoError::Busy {
                    path: String::new(),
                    kind: ActionKind::CheckUpdate,
                });
            }
            state.checking_update = true;
        }

        let result = self.check4update_inner().await;

        {
            let mut state = self.state.lock().await;
            state.checking_update = false;
        }
        result
    }

    async fn check4update_inner(&self) -> Result<(Vec<String>, Vec<RepoError>)> {
        self.list_files().await?;

        let candidates: Vec<String> = {
            let state = self.state.lock().await;
            state
                .entries
                .values()
                .filter(|e| {
                    e.auto_update && matches!(e.status, Status::RemoteChanged | Status::RemoteOnly)
                })
                .map(|e| e.path.clone())
                .collect()
        };

        let mut materialized = Vec::new();
        let mut errors = Vec::new();
        for path in candidates {
            match self.download(&path).await {
                Ok(sub_errors) if sub_errors.is_empty() => materialized.push(path),
                Ok(sub_errors) => errors.extend(sub_errors),
                Err(e) => errors.push(e),
            }
        }
        Ok((materialized, errors))
    }

    /// For a file, sets the flag directly. For a directory, recurses over
    /// descendant files and returns how many actually changed.
    pub async fn set_auto_update(&self, path: &str, flag: bool) -> Result<usize> {
        let path = self.mapper.to_repo_key(path)?;
        let mut state = self.state.lock().await;
        let is_directory = lookup(&state.entries, &path)?.is_directory;

        let targets: Vec<String> = if is_directory {
            let prefix = format!("{path}/");
            state
                .entries
                .values()
                .filter(|e| !e.is_directory && e.path.starts_with(&prefix))
                .map(|e| e.path.clone())
                .collect()
        } else {
            vec![path]
        };

        let mut changed = 0usize;
        for target in &targets {
            let local_mtime = state
                .entries
                .get(target)
                .and_then(|e| e.local_mtime)
                .unwrap_or_else(Utc::now);
            let was_changed = {
                let entry = state.entries.get_mut(target).unwrap();
                let was = entry.auto_update != flag;
                entry.auto_update = flag;
                was
            };
            if was_changed {
                changed += 1;
            }
            state.store.put_local(
                target.clone(),
                LocalRecord {
                    auto_update: flag,
                    local_mtime,
                },
            );
        }
        state.store.flush(Kind::Local)?;
        Ok(changed)
    }

    pub async fn set_ignore_patterns(&self, patterns: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.filters.set_patterns(patterns)?;
        state.store.config.ignore_patterns = patterns.to_string();
        state.store.flush(Kind::Config)
    }

    pub async fn ignore_patterns(&self) -> String {
        let state = self.state.lock().await;
        state.filters.patterns().to_string()
    }
}

fn lookup<'a>(entries: &'a BTreeMap<String, Entry>, path: &str) -> Result<&'a Entry> {
    entries.get(path).ok_or_else(|| RepoError::NotFound {
        path: path.to_string(),
    })
}

fn fs_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_path_joins_slash_separated_key() {
        let root = Path::new("/repo");
        assert_eq!(fs_path(root, "a/b/c.py"), Path::new("/repo/a/b/c.py"));
    }

    #[test]
    fn lookup_missing_path_is_not_found() {
        let entries: BTreeMap<String, Entry> = BTreeMap::new();
        assert!(matches!(
            lookup(&entries, "missing"),
            Err(RepoError::NotFound { .. })
        ));
    }
}
