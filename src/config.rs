//! Environment-driven configuration.
//!
//! Everything is read once at startup. Missing mandatory variables are
//! fatal; everything else has a default suitable for talking to the real
//! NWS endpoints.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Push-source (NWWS-OI XMPP) settings.
#[derive(Debug, Clone)]
pub struct NwwsConfig {
    /// XMPP server host
    pub host: String,
    /// XMPP server port
    pub port: u16,
    /// Account name (bare, without domain)
    pub username: String,
    /// Account password
    pub password: String,
    /// Multi-user chat room to join
    pub room: String,
}

/// Pull-source (api.weather.gov) settings.
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Base URL of the alert API
    pub base_url: String,
    /// Time between polls
    pub poll_interval: Duration,
    /// `User-Agent` identifying this deployment, required upstream
    pub user_agent: String,
}

/// The full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Push source settings; `None` when `NWWS_ENABLED` is off
    pub nwws: Option<NwwsConfig>,
    /// Pull source settings
    pub pull: PullConfig,
    /// Two-letter state codes to keep; empty accepts everything
    pub filter_states: Vec<String>,
    /// How long past expiration an alert survives before eviction
    pub expiration_grace: Duration,
    /// Snapshot file path; `None` disables persistence
    pub persist_path: Option<PathBuf>,
    /// County/zone reference table path
    pub reference_path: PathBuf,
    /// HTTP/WebSocket listen address
    pub listen: SocketAddr,
}

/// The error returned when the environment cannot be turned into a
/// [`Config`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A mandatory variable is missing
    #[error("missing mandatory environment variable {0}")]
    Missing(&'static str),
    /// A variable is present but unusable
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// The variable name
        name: &'static str,
        /// The offending value
        value: String,
    },
}

const DEFAULT_NWWS_HOST: &str = "nwws-oi.weather.gov";
const DEFAULT_NWWS_PORT: u16 = 5222;
const DEFAULT_NWWS_ROOM: &str = "nwws@conference.nwws-oi.weather.gov";
const DEFAULT_API_BASE: &str = "https://api.weather.gov";
const DEFAULT_POLL_SECONDS: u64 = 300;
const DEFAULT_GRACE_SECONDS: u64 = 60;
const DEFAULT_REFERENCE_PATH: &str = "data/ugc_zones.json";
const DEFAULT_USER_AGENT: &str = concat!("stormwire/", env!("CARGO_PKG_VERSION"));

/// The floor on the poll interval, regardless of configuration.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Read the configuration through a lookup function (testable).
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let truthy = |value: &str| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        };

        let nwws = match lookup("NWWS_ENABLED").as_deref().map(truthy) {
            Some(true) => {
                let username = lookup("NWWS_USERNAME")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::Missing("NWWS_USERNAME"))?;
                let password = lookup("NWWS_PASSWORD")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::Missing("NWWS_PASSWORD"))?;
                let port = match lookup("NWWS_PORT") {
                    Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                        name: "NWWS_PORT",
                        value,
                    })?,
                    None => DEFAULT_NWWS_PORT,
                };
                Some(NwwsConfig {
                    host: lookup("NWWS_HOST").unwrap_or_else(|| DEFAULT_NWWS_HOST.into()),
                    port,
                    username,
                    password,
                    room: lookup("NWWS_ROOM").unwrap_or_else(|| DEFAULT_NWWS_ROOM.into()),
                })
            }
            _ => None,
        };

        let poll_seconds = match lookup("POLL_INTERVAL_SECONDS") {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "POLL_INTERVAL_SECONDS",
                value,
            })?,
            None => DEFAULT_POLL_SECONDS,
        };
        let pull = PullConfig {
            base_url: lookup("NWS_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
            poll_interval: Duration::from_secs(poll_seconds).max(MIN_POLL_INTERVAL),
            user_agent: lookup("NWS_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.into()),
        };

        let filter_states = lookup("FILTER_STATES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let grace_seconds = match lookup("EXPIRATION_GRACE_SECONDS") {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::Invalid {
                name: "EXPIRATION_GRACE_SECONDS",
                value,
            })?,
            None => DEFAULT_GRACE_SECONDS,
        };

        let persist_path = lookup("PERSIST_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let reference_path = lookup("REFERENCE_PATH")
            .unwrap_or_else(|| DEFAULT_REFERENCE_PATH.into())
            .into();

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value,
            })?,
            None => 8080,
        };
        let listen = format!("{host}:{port}")
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "HOST",
                value: host,
            })?;

        Ok(Config {
            nwws,
            pull,
            filter_states,
            expiration_grace: Duration::from_secs(grace_seconds),
            persist_path,
            reference_path,
            listen,
        })
    }
}
