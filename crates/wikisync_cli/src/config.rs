//! Configuration file support for wikisync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `WIKISYNC_`, sections separated by `__`,
//!    e.g., `WIKISYNC_WIKI__PASSWORD`)
//! 3. Local config file (./wikisync.toml)
//! 4. XDG config file (~/.config/wikisync/config.toml)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [wiki]
//! api_url = "https://leagueoflegends.fandom.com/api.php"
//! username = "Bot@sync"
//! password = "..."  # or use WIKISYNC_WIKI__PASSWORD
//! requests_per_minute = 39
//!
//! [source]
//! requests_per_second = 10
//! prefetch = 10
//!
//! [sync]
//! checkpoint_every = 100
//! ledger_file = "Profile-Icons-V1-lockfile.png"
//! precheck = true
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;

use wikisync::api::DEFAULT_USER_AGENT;
use wikisync::scheduler::DEFAULT_REQUESTS_PER_MINUTE;
use wikisync::source::{
    DEFAULT_AGGREGATE_ROOT, DEFAULT_ASSET_NAME, DEFAULT_BASE_URL, DEFAULT_DOCUMENT_TITLE,
    DEFAULT_PREFETCH,
};
use wikisync::rate_limit::DEFAULT_SOURCE_RPS;
use wikisync::sync::{DEFAULT_CHECKPOINT_EVERY, DEFAULT_LEDGER_FILE};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote wiki settings.
    pub wiki: WikiConfig,
    /// Content-distribution source settings.
    pub source: SourceConfig,
    /// Sync run settings.
    pub sync: SyncConfig,
}

/// Remote wiki configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    /// Action API endpoint, e.g. `https://example.fandom.com/api.php`.
    pub api_url: Option<String>,
    /// Bot account name. Login is skipped when unset.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request ceiling; keep it below the server's advertised limit.
    pub requests_per_minute: u32,
    pub user_agent: String,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            username: None,
            password: None,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Content-distribution source configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    /// Image fetches kept in flight ahead of the sync loop.
    pub prefetch: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            requests_per_second: DEFAULT_SOURCE_RPS,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

/// Sync run configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ledger mutations between checkpoints.
    pub checkpoint_every: usize,
    /// Store name of the ledger carrier.
    pub ledger_file: String,
    /// Document page title pattern; `{id}` is replaced.
    pub document_title: String,
    /// Asset file name pattern; `{id}` and `{ext}` are replaced.
    pub asset_name: String,
    /// Page text for newly uploaded assets.
    pub asset_description: Option<String>,
    /// Title prefix of the index and set modules.
    pub aggregate_root: String,
    /// PNG used as the carrier before any ledger has been published.
    pub carrier_template: Option<PathBuf>,
    /// Skip the run when the published ledger checksum already matches.
    pub precheck: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            ledger_file: DEFAULT_LEDGER_FILE.to_string(),
            document_title: DEFAULT_DOCUMENT_TITLE.to_string(),
            asset_name: DEFAULT_ASSET_NAME.to_string(),
            asset_description: None,
            aggregate_root: DEFAULT_AGGREGATE_ROOT.to_string(),
            carrier_template: None,
            precheck: true,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/wikisync/config.toml)
    /// 3. Local config file (./wikisync.toml)
    /// 4. Environment variables with WIKISYNC_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!("Loading config from {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from("wikisync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./wikisync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., WIKISYNC_SYNC__CHECKPOINT_EVERY -> sync.checkpoint_every
        builder = builder.add_source(Self::environment());

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    fn environment() -> Environment {
        Environment::with_prefix("WIKISYNC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "wikisync").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Login credentials, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.wiki.username, &self.wiki.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}
