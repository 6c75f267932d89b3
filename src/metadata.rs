use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};

pub const METADATA_DIR: &str = ".repository";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteRecord {
    pub directory: bool,
    pub pub_date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LocalRecord {
    #[serde(default)]
    pub auto_update: bool,
    pub local_mtime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadedRecord {
    pub downloaded_pub_date: DateTime<Utc>,
    pub downloaded_local_mtime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigRecord {
    #[serde(default)]
    pub ignore_patterns: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
}

impl Default for ConfigRecord {
    fn default() -> Self {
        Self {
            ignore_patterns: crate::ignore::DEFAULT_PATTERNS.to_string(),
            remote_url: None,
            upload_url: None,
        }
    }
}

/// C3 — loads/persists the three per-path JSON sidecars plus the single
/// `config.json`, all under a hidden `.repository/` subdirectory of the
/// install root. Every write goes through [`MetadataStore::flush`], which
/// writes a sibling `*.tmp` file and renames it into place, so readers
/// never observe a partial record.
pub struct MetadataStore {
    dir: PathBuf,
    pub repository: HashMap<String, RemoteRecord>,
    pub local: HashMap<String, LocalRecord>,
    pub downloaded: HashMap<String, DownloadedRecord>,
    pub config: ConfigRecord,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Repository,
    Local,
    Downloaded,
    Config,
}

impl MetadataStore {
    /// Load all four sidecars under `install_root/.repository`. Absent
    /// files yield empty maps / default config; malformed JSON raises
    /// `CorruptMetadata` naming the offending file.
    pub fn load(install_root: &Path) -> Result<Self> {
        let dir = install_root.join(METADATA_DIR);
        fs::create_dir_all(&dir)?;

        let repository = load_map(&dir.join("repository.json"))?;
        let local = load_map(&dir.join("local.json"))?;
        let downloaded = load_map(&dir.join("downloaded.json"))?;
        let config = load_one(&dir.join("config.json"))?.unwrap_or_default();

        Ok(Self {
            dir,
            repository,
            local,
            downloaded,
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn put_remote(&mut self, path: String, record: RemoteRecord) {
        self.repository.insert(path, record);
    }

    pub fn delete_remote(&mut self, path: &str) {
        self.repository.remove(path);
    }

    pub fn put_local(&mut self, path: String, record: LocalRecord) {
        self.local.insert(path, record);
    }

    pub fn delete_local(&mut self, path: &str) {
        self.local.remove(path);
    }

    pub fn put_downloaded(&mut self, path: String, record: DownloadedRecord) {
        self.downloaded.insert(path, record);
    }

    pub fn delete_downloaded(&mut self, path: &str) {
        self.downloaded.remove(path);
    }

    /// Persist one sidecar to disk atomically.
    pub fn flush(&self, kind: Kind) -> Result<()> {
        match kind {
            Kind::Repository => write_atomic(&self.dir.join("repository.json"), &self.repository),
            Kind::Local => write_atomic(&self.dir.join("local.json"), &self.local),
            Kind::Downloaded => write_atomic(&self.dir.join("downloaded.json"), &self.downloaded),
            Kind::Config => write_atomic(&self.dir.join("config.json"), &self.config),
        }
    }
}

fn load_map<T>(path: &Path) -> Result<HashMap<String, T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| RepoError::CorruptMetadata {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn load_one<T>(path: &Path) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data).map_err(|e| RepoError::CorruptMetadata {
        file: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(Some(value))
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| RepoError::Io {
            detail: e.to_string(),
        })?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn make_temp_dir() -> PathBuf {
        let mut root = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        root.push(format!("scriptrepo-metadata-test-{nanos}"));
        fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn absent_sidecars_load_as_empty() {
        let root = make_temp_dir();
        let store = MetadataStore::load(&root).unwrap();
        assert!(store.repository.is_empty());
        assert!(store.local.is_empty());
        assert!(store.downloaded.is_empty());
        assert_eq!(store.config.ignore_patterns, crate::ignore::DEFAULT_PATTERNS);
    }

    #[test]
    fn round_trip_repository_sidecar() {
        let root = make_temp_dir();
        let mut store = MetadataStore::load(&root).unwrap();
        store.put_remote(
            "a.py".to_string(),
            RemoteRecord {
                directory: false,
                pub_date: DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
                description: "a script".to_string(),
                author: "alice".to_string(),
            },
        );
        store.flush(Kind::Repository).unwrap();

        let reloaded = MetadataStore::load(&root).unwrap();
        assert_eq!(reloaded.repository.get("a.py"), store.repository.get("a.py"));
        assert!(!root.join(".repository").join("repository.json.tmp").exists());
    }

    #[test]
    fn corrupt_sidecar_is_reported_with_file_context() {
        let root = make_temp_dir();
        let dir = root.join(METADATA_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("repository.json"), b"{not json").unwrap();

        let err = MetadataStore::load(&root).unwrap_err();
        match err {
            RepoError::CorruptMetadata { file, .. } => {
                assert!(file.ends_with("repository.json"));
            }
            other => panic!("expected CorruptMetadata, got {other:?}"),
        }
    }

    #[test]
    fn delete_removes_entry_after_flush() {
        let root = make_temp_dir();
        let mut store = MetadataStore::load(&root).unwrap();
        store.put_local(
            "a.py".to_string(),
            LocalRecord {
                auto_update: true,
                local_mtime: Utc::now(),
            },
        );
        store.flush(Kind::Local).unwrap();
        store.delete_local("a.py");
        store.flush(Kind::Local).unwrap();

        let reloaded = MetadataStore::load(&root).unwrap();
        assert!(reloaded.local.is_empty());
    }
}
