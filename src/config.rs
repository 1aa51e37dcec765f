use std::fmt;
use std::time::Duration;

use url::Url;

use crate::cli::{BehaviourArgs, ConnectionArgs};
use crate::error::ControlError;

#[derive(Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub service_manager_url: Url,
    pub instance_name: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub dry_run: bool,
    pub wait: Option<WaitConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("token_url", &self.token_url.as_str())
            .field("service_manager_url", &self.service_manager_url.as_str())
            .field("instance_name", &self.instance_name)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("dry_run", &self.dry_run)
            .field("wait", &self.wait)
            .finish()
    }
}

impl Config {
    pub fn from_args(conn: &ConnectionArgs, behaviour: &BehaviourArgs) -> Result<Self, ControlError> {
        let client_id = required(conn.client_id.as_deref(), "CLIENT_ID")?;
        let client_secret = required(conn.client_secret.as_deref(), "CLIENT_SECRET")?;
        let token_url = parse_url(required(conn.token_url.as_deref(), "TOKEN_URL")?, "TOKEN_URL")?;
        let service_manager_url = parse_url(
            required(conn.service_manager_url.as_deref(), "SERVICE_MANAGER_URL")?,
            "SERVICE_MANAGER_URL",
        )?;
        let instance_name = required(conn.instance_name.as_deref(), "INSTANCE_NAME")?;

        if !(1..=300).contains(&behaviour.timeout_secs) {
            return Err(ControlError::config("HTTP_TIMEOUT_SECS must be between 1 and 300"));
        }
        if !(0..=10).contains(&behaviour.max_retries) {
            return Err(ControlError::config("HTTP_MAX_RETRIES must be between 0 and 10"));
        }

        let wait = if behaviour.wait {
            if !(1..=3600).contains(&behaviour.poll_interval_secs) {
                return Err(ControlError::config("--poll-interval-secs must be between 1 and 3600"));
            }
            if !(1..=86_400).contains(&behaviour.wait_timeout_secs) {
                return Err(ControlError::config("--wait-timeout-secs must be between 1 and 86400"));
            }
            Some(WaitConfig {
                timeout: Duration::from_secs(behaviour.wait_timeout_secs),
                poll_interval: Duration::from_secs(behaviour.poll_interval_secs),
            })
        } else {
            None
        };

        Ok(Config {
            client_id,
            client_secret,
            token_url,
            service_manager_url,
            instance_name,
            request_timeout: Duration::from_secs(behaviour.timeout_secs),
            max_retries: behaviour.max_retries,
            dry_run: behaviour.dry_run,
            wait,
        })
    }
}

fn required(value: Option<&str>, name: &str) -> Result<String, ControlError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(ControlError::config(format!("{name} cannot be empty"))),
        None => Err(ControlError::config(format!("{name} is required"))),
    }
}

fn parse_url(raw: String, name: &str) -> Result<Url, ControlError> {
    let url = Url::parse(&raw).map_err(|e| ControlError::config(format!("{name} invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ControlError::config(format!("{name} must use http or https")));
    }
    Ok(url)
}
