use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::download::DownloadConfig;
use crate::retry::RetryConfig;
use crate::types::LogLevel;

/// Placeholder substituted with the child ID in the album URL template.
pub const CHILD_ID_PLACEHOLDER: &str = "{child_id}";

pub const DEFAULT_BASE_URL: &str = "https://www.kidsnote.com/api";

/// Config files tried, in order, when `--config` is not given.
const CONFIG_SEARCH_PATHS: [&str; 2] = ["config.yaml", "/config/config.yaml"];

/// Hard ceiling on a single `download-albums` run.
const DOWNLOAD_DEADLINE: Duration = Duration::from_secs(5 * 60 * 60);

/// Remote endpoints and HTTP settings, read-only once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub login_url: String,
    pub info_url: String,
    pub album_url_template: String,
    pub user_cookie_domain: String,
    pub session_cookie_domain: String,
    pub timeout: Duration,
}

impl ApiConfig {
    /// Endpoints derived from an API root such as `https://www.kidsnote.com/api`.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            login_url: format!("{base}/web/login"),
            info_url: format!("{base}/v1/me/info"),
            album_url_template: format!("{base}/v1_2/children/{CHILD_ID_PLACEHOLDER}/albums"),
            user_cookie_domain: "www.kidsnote.com".to_string(),
            session_cookie_domain: ".kidsnote.com".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// First page of a child's album listing.
    pub fn album_url_for(&self, child_id: i64) -> String {
        self.album_url_template
            .replace(CHILD_ID_PLACEHOLDER, &child_id.to_string())
    }
}

/// Settings read from the YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub album_dir: Option<String>,
    pub api: FileApiConfig,
    pub cookies: FileCookieConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileApiConfig {
    pub base_url: Option<String>,
    pub login_url: Option<String>,
    pub info_url: Option<String>,
    pub album_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileCookieConfig {
    pub user_domain: Option<String>,
    pub session_domain: Option<String>,
}

impl FileConfig {
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&yaml)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load `explicit`, which must exist, or the first config file found on
    /// the search path. No file at all yields empty settings.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(&expand_tilde(&path.to_string_lossy()));
        }
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Using config file");
                return Self::from_path(path);
            }
        }
        Ok(Self::default())
    }
}

/// `%d` is accepted in album URL templates as an alias for `{child_id}`.
fn normalize_album_template(template: &str) -> String {
    if template.contains(CHILD_ID_PLACEHOLDER) {
        template.to_string()
    } else {
        template.replacen("%d", CHILD_ID_PLACEHOLDER, 1)
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

/// Application configuration.
pub struct Config {
    pub username: String,
    pub password: Option<String>,
    pub album_dir: Option<PathBuf>,
    pub api: ApiConfig,
    pub concurrency: usize,
    pub log_level: LogLevel,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("album_dir", &self.album_dir)
            .field("api", &self.api)
            .field("concurrency", &self.concurrency)
            .field("log_level", &self.log_level)
            .field("no_progress_bar", &self.no_progress_bar)
            .finish()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Resolve settings from the command line, the environment and the config
    /// file, in that order of precedence, falling back to built-in defaults.
    pub fn from_cli(cli: &crate::cli::Cli) -> anyhow::Result<Self> {
        let file = FileConfig::load(cli.config.as_deref())?;
        Self::merge(cli, file)
    }

    /// Layer `cli` (which already carries environment values) over `file`.
    pub fn merge(cli: &crate::cli::Cli, file: FileConfig) -> anyhow::Result<Self> {
        let username = non_blank(&cli.username)
            .or_else(|| non_blank(&file.username))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "username is not set (use --username, KIDSNOTER_USERNAME or the config file)"
                )
            })?;

        let base_url = non_blank(&cli.base_url)
            .or_else(|| non_blank(&file.api.base_url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut api = ApiConfig::with_base_url(&base_url);
        if let Some(url) = non_blank(&cli.login_url).or_else(|| non_blank(&file.api.login_url)) {
            api.login_url = url;
        }
        if let Some(url) = non_blank(&cli.info_url).or_else(|| non_blank(&file.api.info_url)) {
            api.info_url = url;
        }
        if let Some(url) = non_blank(&cli.album_url).or_else(|| non_blank(&file.api.album_url)) {
            api.album_url_template = normalize_album_template(&url);
        }
        if !api.album_url_template.contains(CHILD_ID_PLACEHOLDER) {
            anyhow::bail!(
                "album URL template '{}' must contain {}",
                api.album_url_template,
                CHILD_ID_PLACEHOLDER
            );
        }
        if let Some(domain) = non_blank(&cli.user_cookie_domain)
            .or_else(|| non_blank(&file.cookies.user_domain))
        {
            api.user_cookie_domain = domain;
        }
        if let Some(domain) = non_blank(&cli.session_cookie_domain)
            .or_else(|| non_blank(&file.cookies.session_domain))
        {
            api.session_cookie_domain = domain;
        }
        api.timeout = Duration::from_secs(cli.timeout);

        let album_dir = non_blank(&cli.album_dir)
            .or_else(|| non_blank(&file.album_dir))
            .map(|d| expand_tilde(&d));

        Ok(Self {
            username,
            password: cli.password.clone().or(file.password),
            album_dir,
            api,
            concurrency: usize::from(cli.concurrency),
            log_level: cli.log_level,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    /// The album root, required by the download commands.
    pub fn require_album_dir(&self) -> anyhow::Result<&Path> {
        self.album_dir.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "missing album directory (use --album-dir, KIDSNOTER_ALBUM_DIR or the config file)"
            )
        })
    }

    pub fn download_config(&self, overwrite: bool) -> DownloadConfig {
        DownloadConfig {
            overwrite,
            concurrent_downloads: self.concurrency,
            deadline: DOWNLOAD_DEADLINE,
            retry: RetryConfig::default(),
            no_progress_bar: self.no_progress_bar,
        }
    }
}
