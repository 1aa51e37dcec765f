//! Command-line surface for `hana-autostart`.
//!
//! Every connection setting can come from a flag or from the environment;
//! the client secret is environment-only so it never lands in shell history.

use std::fmt;

use clap::{Args, Parser, ValueEnum};

use crate::observability::Level;

#[derive(Parser, Debug)]
#[command(
    name = "hana-autostart",
    version,
    about = "HANA Cloud instance control tool",
    long_about = None
)]
pub struct Cli {
    /// Action to perform
    #[arg(value_enum)]
    pub action: Action,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub behaviour: BehaviourArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// OAuth client id of the Service Manager binding
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Read from CLIENT_SECRET at parse time; there is no flag for it.
    #[arg(skip = std::env::var("CLIENT_SECRET").ok())]
    pub client_secret: Option<String>,

    /// Token endpoint, including /oauth/token
    #[arg(long, env = "TOKEN_URL")]
    pub token_url: Option<String>,

    /// Service Manager API base URL
    #[arg(long, env = "SERVICE_MANAGER_URL")]
    pub service_manager_url: Option<String>,

    /// Instance name, matched against the name or context.instance_name
    #[arg(long, env = "INSTANCE_NAME")]
    pub instance_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BehaviourArgs {
    /// Per-request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Retries for transient failures of idempotent requests
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value_t = 0)]
    pub max_retries: u32,

    /// Decide and report without changing the instance
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Wait for the requested state, or for an in-flight operation to finish
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub wait: bool,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 1800)]
    pub wait_timeout_secs: u64,

    /// Seconds between state polls while waiting
    #[arg(long, default_value_t = 30)]
    pub poll_interval_secs: u64,

    /// Output format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Minimum level for the JSON log written to stderr
    #[arg(long, value_enum, env = "LOG_LEVEL", default_value_t = LogLevelArg::Warn)]
    pub log_level: LogLevelArg,
}

impl Default for BehaviourArgs {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 0,
            dry_run: false,
            wait: false,
            wait_timeout_secs: 1800,
            poll_interval_secs: 30,
            output: OutputFormat::Text,
            log_level: LogLevelArg::Warn,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Status,
    Start,
    Stop,
    Autostart,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Status => "status",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Autostart => "autostart",
        };
        f.write_str(s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
}

impl From<LogLevelArg> for Level {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => Level::Error,
            LogLevelArg::Warn => Level::Warn,
            LogLevelArg::Info => Level::Info,
            LogLevelArg::Debug => Level::Debug,
        }
    }
}
