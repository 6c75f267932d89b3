mod config;
mod error;
mod ignore;
mod install;
mod logging;
mod merge;
mod metadata;
mod path_map;
mod remote;
mod scanner;
mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, ConfigOverrides};
use remote::RemoteCatalogClient;
use sync::Synchronizer;

#[derive(Parser, Debug)]
#[command(name = "scriptrepo", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Catalog URL override (takes precedence over env/config)
    #[arg(long = "catalog-url")]
    catalog_url: Option<String>,

    /// Upload URL override (takes precedence over env/config)
    #[arg(long = "upload-url")]
    upload_url: Option<String>,

    /// Install root override (takes precedence over env/config)
    #[arg(long = "root")]
    root: Option<PathBuf>,

    /// HTTP proxy override (takes precedence over env/config)
    #[arg(long = "proxy")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new local mirror from the configured catalog
    Install {
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Print the resolved config file path
    ConfigPath,

    /// List every entry with its reconciled status
    List,

    /// Print the reconciled status of one entry
    Status { path: String },

    /// Print author/pub-date/auto-update/kind for one entry
    Info { path: String },

    /// Print the stored description for one entry
    Description { path: String },

    /// Fetch a file (or every file under a directory) from the remote
    Download { path: String },

    /// Publish a local file to the remote
    Upload {
        path: String,
        #[arg(long)]
        comment: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        email: String,
    },

    /// Remove a file from the remote
    Remove {
        path: String,
        #[arg(long)]
        comment: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        email: String,
    },

    /// Download every entry whose auto-update flag is set and is behind the remote
    Check4Update,

    /// Toggle the auto-update flag for a file or every file under a directory
    SetAutoUpdate { path: String, flag: bool },

    /// Print the current ignore pattern list
    IgnorePatterns,

    /// Replace the ignore pattern list
    SetIgnorePatterns { patterns: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = Config::resolve_config_path(cli.config.as_deref());
    if matches!(cli.command, Commands::ConfigPath) {
        println!("{}", config_path.display());
        return Ok(());
    }

    let overrides = ConfigOverrides {
        catalog_url: cli.catalog_url,
        upload_url: cli.upload_url,
        install_root: cli.root,
        proxy_http: cli.proxy,
    };
    let cfg = Config::load_with_overrides(&config_path, overrides).context("load config")?;
    logging::init_log_file(&config::default_log_file_path()).ok();

    let remote =
        RemoteCatalogClient::new(&cfg.catalog_url, &cfg.upload_url, cfg.proxy_http.as_deref())
            .context("build remote client")?;

    match cli.command {
        Commands::ConfigPath => unreachable!(),
        Commands::Install { force } => {
            Synchronizer::install(cfg.install_root, remote, force).await?;
            println!("installed at {}", cfg.install_root.display());
        }
        Commands::List => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            for path in sync.list_files().await? {
                let status = sync.file_status(&path).await?;
                println!("{status:?}\t{path}");
            }
        }
        Commands::Status { path } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            println!("{:?}", sync.file_status(&path).await?);
        }
        Commands::Info { path } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            let info = sync.info(&path).await?;
            println!("{info:?}");
        }
        Commands::Description { path } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            println!("{}", sync.description(&path).await?);
        }
        Commands::Download { path } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            let errors = sync.download(&path).await?;
            for e in &errors {
                eprintln!("warning: {e}");
            }
        }
        Commands::Upload {
            path,
            comment,
            author,
            email,
        } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            let pub_date = sync.upload(&path, &comment, &author, &email).await?;
            println!("uploaded, pub_date={pub_date}");
        }
        Commands::Remove {
            path,
            comment,
            author,
            email,
        } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            sync.remove(&path, &comment, &author, &email).await?;
        }
        Commands::Check4Update => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            let (updated, errors) = sync.check4update().await?;
            for path in &updated {
                println!("updated: {path}");
            }
            for e in &errors {
                eprintln!("warning: {e}");
            }
        }
        Commands::SetAutoUpdate { path, flag } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.list_files().await?;
            let n = sync.set_auto_update(&path, flag).await?;
            println!("{n} entries updated");
        }
        Commands::IgnorePatterns => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            println!("{}", sync.ignore_patterns().await);
        }
        Commands::SetIgnorePatterns { patterns } => {
            let sync = Synchronizer::new(cfg.install_root, remote)?;
            sync.set_ignore_patterns(&patterns).await?;
        }
    }

    Ok(())
}
