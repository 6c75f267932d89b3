use std::path::PathBuf;

use crate::error::{RepoError, Result};
use crate::metadata::{Kind, MetadataStore, METADATA_DIR};
use crate::remote::RemoteCatalogClient;

/// C8 — one-shot creation of the install root, its hidden metadata
/// subdirectory, the default ignore pattern, and an initial
/// `repository.json` populated from a freshly fetched catalog.
///
/// Grounded on the teacher's `workspace::ensure_workspace_layout`: an
/// idempotent `create_dir_all` guarded by a "does this already look
/// installed" check, rather than blindly overwriting an existing root.
pub struct Installer;

impl Installer {
    /// Creates `root` and `root/.repository` and persists the default
    /// ignore pattern and a freshly fetched catalog snapshot. Refuses to
    /// run again over an already-installed root unless `force` is set.
    pub async fn install(
        root: &PathBuf,
        remote: &RemoteCatalogClient,
        force: bool,
    ) -> Result<MetadataStore> {
        let metadata_dir = root.join(METADATA_DIR);
        if metadata_dir.exists() && !force {
            return Err(RepoError::InstallFailed {
                detail: format!("{} is already installed", root.display()),
            });
        }
        std::fs::create_dir_all(&metadata_dir).map_err(|e| RepoError::InstallFailed {
            detail: e.to_string(),
        })?;

        let mut store = MetadataStore::load(root)?;
        if store.config.ignore_patterns.is_empty() {
            store.config.ignore_patterns = crate::ignore::DEFAULT_PATTERNS.to_string();
        }
        store.flush(Kind::Config).map_err(|e| RepoError::InstallFailed {
            detail: e.to_string(),
        })?;

        let catalog = remote.fetch_catalog().await?;
        store.repository = catalog;
        store.flush(Kind::Repository)?;

        Ok(store)
    }
}
