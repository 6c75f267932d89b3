use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Default, Deserialize, Clone)]
struct PartialConfig {
    #[serde(default, rename = "ScriptRepository")]
    script_repository: Option<String>,
    #[serde(default, rename = "UploaderWebServer")]
    uploader_web_server: Option<String>,
    #[serde(default, rename = "ScriptLocalRepository")]
    script_local_repository: Option<PathBuf>,
    #[serde(default)]
    proxy: Option<ProxyConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
struct ProxyConfig {
    #[serde(default, rename = "http")]
    http: Option<String>,
}

/// Ambient configuration, keyed exactly as spec.md §6 names them:
/// `ScriptRepository` (catalog URL), `UploaderWebServer` (upload URL),
/// `ScriptLocalRepository` (install root), `proxy.http`.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_url: String,
    pub upload_url: String,
    pub install_root: PathBuf,
    pub proxy_http: Option<String>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub catalog_url: Option<String>,
    pub upload_url: Option<String>,
    pub install_root: Option<PathBuf>,
    pub proxy_http: Option<String>,
}

pub fn default_log_file_path() -> PathBuf {
    home_dir().join(".scriptrepo").join("logs").join("scriptrepo.log")
}

impl Config {
    pub fn default_install_root() -> PathBuf {
        home_dir().join("ScriptRepository")
    }

    pub fn default_config_path() -> PathBuf {
        home_dir().join(".scriptrepo").join("config.json")
    }

    pub fn resolve_config_path(flag_path: Option<&Path>) -> PathBuf {
        if let Some(p) = flag_path {
            return absolutize_path(p);
        }
        if let Ok(env_path) = std::env::var("SCRIPTREPO_CONFIG_PATH") {
            let env_path = env_path.trim();
            if !env_path.is_empty() {
                return absolutize_path(Path::new(env_path));
            }
        }
        absolutize_path(&Self::default_config_path())
    }

    pub fn load_file_only(path: &Path) -> Result<Self> {
        Self::load_with_overrides(path, ConfigOverrides::default())
    }

    /// Precedence: explicit override > environment variable > config file >
    /// built-in default, evaluated independently per field.
    pub fn load_with_overrides(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let file_cfg = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<PartialConfig>(&data).context("parse config json")?
        } else {
            PartialConfig::default()
        };
        let env_cfg = read_env_config();

        let catalog_url = overrides
            .catalog_url
            .or(env_cfg.script_repository)
            .or(file_cfg.script_repository)
            .unwrap_or_default();
        let upload_url = overrides
            .upload_url
            .or(env_cfg.uploader_web_server)
            .or(file_cfg.uploader_web_server)
            .unwrap_or_default();
        let install_root = overrides
            .install_root
            .or(env_cfg.script_local_repository)
            .or(file_cfg.script_local_repository)
            .unwrap_or_else(Self::default_install_root);
        let proxy_http = overrides
            .proxy_http
            .or(env_cfg.proxy.and_then(|p| p.http))
            .or(file_cfg.proxy.and_then(|p| p.http));

        let mut cfg = Config {
            catalog_url,
            upload_url,
            install_root,
            proxy_http,
            config_path: Some(absolutize_path(path)),
        };
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            anyhow::bail!("config_path missing");
        };
        save_config_file(path, self)
    }

    fn normalize(&mut self) {
        self.install_root = absolutize_path(&self.install_root);
        if let Some(p) = self.config_path.take() {
            self.config_path = Some(absolutize_path(&p));
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.catalog_url.is_empty() {
            validate_url(&self.catalog_url).context("ScriptRepository")?;
        }
        if !self.upload_url.is_empty() {
            validate_url(&self.upload_url).context("UploaderWebServer")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PersistedConfig<'a> {
    #[serde(rename = "ScriptRepository")]
    script_repository: &'a str,
    #[serde(rename = "UploaderWebServer")]
    uploader_web_server: &'a str,
    #[serde(rename = "ScriptLocalRepository")]
    script_local_repository: &'a PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyConfig>,
}

fn save_config_file(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let persisted = PersistedConfig {
        script_repository: &cfg.catalog_url,
        uploader_web_server: &cfg.upload_url,
        script_local_repository: &cfg.install_root,
        proxy: cfg.proxy_http.clone().map(|http| ProxyConfig { http: Some(http) }),
    };
    let data = serde_json::to_vec_pretty(&persisted).context("serialize config")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub(crate) fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("url must be http or https");
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn absolutize_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let abs = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };
    clean_lexical(&abs)
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
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

fn read_env_config() -> PartialConfig {
    let mut out = PartialConfig::default();
    if let Ok(v) = std::env::var("SCRIPTREPO_CATALOG_URL") {
        let v = v.trim();
        if !v.is_empty() {
            out.script_repository = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("SCRIPTREPO_UPLOAD_URL") {
        let v = v.trim();
        if !v.is_empty() {
            out.uploader_web_server = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("SCRIPTREPO_LOCAL_ROOT") {
        let v = v.trim();
        if !v.is_empty() {
            out.script_local_repository = Some(PathBuf::from(v));
        }
    }
    if let Ok(v) = std::env::var("SCRIPTREPO_PROXY_HTTP") {
        let v = v.trim();
        if !v.is_empty() {
            out.proxy = Some(ProxyConfig {
                http: Some(v.to_string()),
            });
        }
    }
    out
}
