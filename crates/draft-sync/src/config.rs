// Configuration loading and parsing (draft-sync.toml, credentials.toml) with
// environment-variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::api::RetryPolicy;

/// Main config file, relative to `config/`.
pub const CONFIG_FILE: &str = "draft-sync.toml";
/// Optional credentials file, relative to `config/`.
pub const CREDENTIALS_FILE: &str = "credentials.toml";

pub const ENV_LEAGUE_ID: &str = "LEAGUE_ID";
pub const ENV_FILENAME: &str = "FILENAME";
/// Older name for [`ENV_FILENAME`], read when `FILENAME` is unset.
pub const ENV_EXCEL_FILENAME: &str = "EXCEL_FILENAME";
pub const ENV_POLL_INTERVAL: &str = "DRAFT_MONITOR_INTERVAL";
pub const ENV_ACCESS_TOKEN: &str = "YAHOO_ACCESS_TOKEN";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub league: LeagueConfig,
    pub monitor: MonitorConfig,
    pub output: OutputConfig,
    pub api: ApiConfig,
    pub projections: ProjectionsConfig,
    pub credentials: CredentialsConfig,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.api.max_attempts,
            base_delay: Duration::from_millis(self.api.base_delay_ms),
        }
    }

    /// Where the selected backend keeps the document.
    ///
    /// Both backends take the file stem and add their own extension, so a
    /// `filename` given with either suffix works for both.
    pub fn document_path(&self) -> PathBuf {
        let stem = strip_document_suffix(&self.output.filename);
        match self.output.backend {
            Backend::Xlsx => PathBuf::from(format!("{stem}.xlsx")),
            Backend::Numbers => PathBuf::from(format!("{stem}.numbers")),
        }
    }
}

/// Raw deserialization target for draft-sync.toml.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    league: LeagueConfig,
    #[serde(default)]
    monitor: MonitorConfig,
    output: OutputConfig,
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    projections: ProjectionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueConfig {
    pub league_id: String,
    /// Yahoo game code ("nhl", "nfl", "mlb", "nba").
    #[serde(default = "default_game_code")]
    pub game_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Fetch player names for already-made picks before the first tick.
    #[serde(default = "default_true")]
    pub warm_cache: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            warm_cache: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// An Excel workbook on disk.
    Xlsx,
    /// An open Apple Numbers document driven through AppleScript.
    Numbers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub filename: String,
    #[serde(default = "default_backend")]
    pub backend: Backend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectionsConfig {
    /// Projections CSV used for projected points. Empty or absent disables
    /// the projected column.
    #[serde(default)]
    pub path: Option<String>,
}

impl ProjectionsConfig {
    pub fn path(&self) -> Option<&Path> {
        self.path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Path::new)
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

/// OAuth access token obtained out of band. Refresh is not handled here.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub access_token: Option<String>,
}

fn default_game_code() -> String {
    "nhl".to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_backend() -> Backend {
    Backend::Xlsx
}

fn default_base_url() -> String {
    crate::api::yahoo::YAHOO_API_BASE.to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/draft-sync.toml` and
/// (optionally) `config/credentials.toml` relative to `base_dir`, applying
/// overrides from `env`.
///
/// This is the lower-level loading primitive that neither copies defaults nor
/// reads the process environment. Prefer `load_config()`.
pub(crate) fn load_config_from<F>(base_dir: &Path, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_dir = base_dir.join("config");

    // --- draft-sync.toml (required) ---
    let config_path = config_dir.join(CONFIG_FILE);
    let config_text = read_file(&config_path)?;
    let file: ConfigFile = toml::from_str(&config_text).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join(CREDENTIALS_FILE);
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let mut config = Config {
        league: file.league,
        monitor: file.monitor,
        output: file.output,
        api: file.api,
        projections: file.projections,
        credentials,
    };

    apply_env_overrides(&mut config, env)?;
    validate(&config)?;

    Ok(config)
}

/// Seed `config/draft-sync.toml` from `defaults/draft-sync.toml` on first
/// run, so a fresh checkout starts with the sample league, output and monitor
/// sections to edit.
///
/// Returns the path written, or `None` when a config file is already in
/// place. Credentials are never seeded: `credentials.toml` is optional and
/// the access token may come from the environment instead.
pub fn seed_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "{} is missing and there is no {} to start from; \
                 create it with [league] league_id and [output] filename",
                target.display(),
                source.display()
            ),
        });
    }

    let copy_err = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to create {}: {e}", target.display()),
    };
    if let Some(config_dir) = target.parent() {
        std::fs::create_dir_all(config_dir).map_err(copy_err)?;
    }
    let mut dest = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(dest) => dest,
        // Another process seeded it first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(copy_err(e)),
    };
    let mut src = std::fs::File::open(&source).map_err(copy_err)?;
    std::io::copy(&mut src, &mut dest).map_err(copy_err)?;

    Ok(Some(target))
}

/// Convenience wrapper: loads config relative to the current working
/// directory, overridden by the process environment. Copies default config
/// files first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    if let Some(seeded) = seed_config_file(&cwd)? {
        info!("Created {} from defaults; edit it for your league", seeded.display());
    }
    load_config_from(&cwd, |key| std::env::var(key).ok())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(league_id) = non_empty(ENV_LEAGUE_ID) {
        config.league.league_id = league_id.trim().to_string();
    }
    let filename = non_empty(ENV_FILENAME).or_else(|| non_empty(ENV_EXCEL_FILENAME));
    if let Some(filename) = filename {
        config.output.filename = filename.trim().to_string();
    }
    if let Some(interval) = non_empty(ENV_POLL_INTERVAL) {
        config.monitor.poll_interval_seconds =
            interval
                .trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError {
                    field: ENV_POLL_INTERVAL.into(),
                    message: format!("expected a whole number of seconds, got `{interval}`"),
                })?;
    }
    if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
        config.credentials.access_token = Some(token.trim().to_string());
    }
    Ok(())
}

/// Drop a spreadsheet extension so the stem can be reused per backend.
fn strip_document_suffix(filename: &str) -> &str {
    let lower = filename.to_ascii_lowercase();
    for suffix in [".xlsx", ".numbers"] {
        if lower.ends_with(suffix) {
            let stem = &filename[..filename.len() - suffix.len()];
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    filename
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.league.league_id.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "league.league_id".into(),
            message: "must not be empty".into(),
        });
    }

    if config.league.game_code.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "league.game_code".into(),
            message: "must not be empty".into(),
        });
    }

    if config.monitor.poll_interval_seconds == 0 {
        return Err(ConfigError::ValidationError {
            field: "monitor.poll_interval_seconds".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.output.filename.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "output.filename".into(),
            message: "must not be empty".into(),
        });
    }

    if config.api.max_attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "api.max_attempts".into(),
            message: "must be at least 1".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
