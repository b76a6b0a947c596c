use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "kidsnoter-rs",
    version,
    about = "Mirror kidsnote photo albums to local storage"
)]
pub struct Cli {
    /// YAML config file (default: ./config.yaml, then /config/config.yaml).
    /// Command-line options and environment variables override its values.
    #[arg(short = 'c', long, env = "KIDSNOTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// kidsnote login name
    #[arg(short = 'u', long, env = "KIDSNOTER_USERNAME", global = true)]
    pub username: Option<String>,

    /// kidsnote password (if not provided, will prompt).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the KIDSNOTER_PASSWORD environment variable instead.
    #[arg(
        short = 'p',
        long,
        env = "KIDSNOTER_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,

    /// Root directory albums are mirrored into
    #[arg(short = 'd', long, env = "KIDSNOTER_ALBUM_DIR", global = true)]
    pub album_dir: Option<String>,

    /// API root; login, info and album URLs derive from it unless set explicitly
    /// (default: https://www.kidsnote.com/api)
    #[arg(long, env = "KIDSNOTER_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Login endpoint (default: <base-url>/web/login)
    #[arg(long, env = "KIDSNOTER_LOGIN_URL", global = true)]
    pub login_url: Option<String>,

    /// Account info endpoint (default: <base-url>/v1/me/info)
    #[arg(long, env = "KIDSNOTER_INFO_URL", global = true)]
    pub info_url: Option<String>,

    /// Album listing URL template, must contain `{child_id}`
    /// (default: <base-url>/v1_2/children/{child_id}/albums)
    #[arg(long, env = "KIDSNOTER_ALBUM_URL", global = true)]
    pub album_url: Option<String>,

    /// Domain the `current_user` cookie is stored for (default: www.kidsnote.com)
    #[arg(long, env = "KIDSNOTER_USER_COOKIE_DOMAIN", global = true)]
    pub user_cookie_domain: Option<String>,

    /// Domain the `session_id` cookie is stored for (default: .kidsnote.com)
    #[arg(long, env = "KIDSNOTER_SESSION_COOKIE_DOMAIN", global = true)]
    pub session_cookie_domain: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "KIDSNOTER_TIMEOUT", default_value_t = 60, global = true)]
    pub timeout: u64,

    /// Number of albums downloaded concurrently
    #[arg(
        long,
        env = "KIDSNOTER_CONCURRENCY",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..),
        global = true
    )]
    pub concurrency: u16,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(
        long,
        env = "KIDSNOTER_LOG_LEVEL",
        value_enum,
        default_value = "info",
        global = true
    )]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, env = "KIDSNOTER_NO_PROGRESS_BAR", global = true)]
    pub no_progress_bar: bool,

    /// Serve Prometheus metrics at http://<addr>/metrics (e.g. 0.0.0.0:9091)
    #[arg(long, env = "KIDSNOTER_METRICS_ADDR", global = true)]
    pub metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the children under your account
    ListChildren,

    /// List the photo albums of one child, or of every child
    ListAlbums(ChildArgs),

    /// Download the photo albums of one child, or of every child
    DownloadAlbums {
        #[command(flatten)]
        child: ChildArgs,

        /// Overwrite existing files in the album directory
        #[arg(long)]
        overwrite: bool,
    },

    /// Run in continuous album synchronization mode
    Serve {
        /// Overwrite existing files in the album directory
        #[arg(long)]
        overwrite: bool,

        /// Seconds to wait between synchronization runs
        #[arg(
            long,
            env = "KIDSNOTER_SYNC_INTERVAL",
            default_value_t = 3600,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        sync_interval: u64,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ChildArgs {
    /// Child's ID, check with `kidsnoter-rs list-children`
    #[arg(long, conflicts_with = "child_name")]
    pub child_id: Option<i64>,

    /// Child's name, must match the output of `kidsnoter-rs list-children`
    #[arg(long)]
    pub child_name: Option<String>,
}
