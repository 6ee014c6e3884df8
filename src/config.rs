use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Tunables the authority itself reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesConfig {
    /// Crisis added for every card played.
    pub crisis_per_play: i64,
    /// Sector resource granted to the playing role when its card is accepted.
    pub resource_per_accept: i64,
    /// Forced advance for Play and Vote when quorum is not reached in time.
    pub round_deadline: Option<Duration>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            crisis_per_play: 1,
            resource_per_accept: 1,
            round_deadline: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub status_addr: SocketAddr,
    /// WebSocket path the board display connects on.
    pub board_path: String,
    pub rules: RulesConfig,
    pub board_radius: u32,
    pub risks_per_card: usize,
    pub risk_seed: Option<u64>,
    pub catalogue: Option<PathBuf>,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env");
        }
        Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RulesConfig::default();
        let deadline_secs: Option<u64> = parse_opt(&lookup, "CRISIS_ROUND_DEADLINE_SECS")?;

        Ok(Self {
            bind_addr: parse_or(&lookup, "CRISIS_BIND_ADDR", ([127, 0, 0, 1], 9001).into())?,
            status_addr: parse_or(&lookup, "CRISIS_STATUS_ADDR", ([127, 0, 0, 1], 9002).into())?,
            board_path: lookup("CRISIS_BOARD_PATH").unwrap_or_else(|| "/board".to_string()),
            rules: RulesConfig {
                crisis_per_play: parse_or(&lookup, "CRISIS_PER_PLAY", defaults.crisis_per_play)?,
                resource_per_accept: parse_or(
                    &lookup,
                    "CRISIS_RESOURCE_PER_ACCEPT",
                    defaults.resource_per_accept,
                )?,
                round_deadline: deadline_secs.filter(|&s| s > 0).map(Duration::from_secs),
            },
            board_radius: parse_or(&lookup, "CRISIS_BOARD_RADIUS", 3)?,
            risks_per_card: parse_or(&lookup, "CRISIS_RISKS_PER_CARD", 1)?,
            risk_seed: parse_opt(&lookup, "CRISIS_RISK_SEED")?,
            catalogue: lookup("CRISIS_CATALOGUE").map(PathBuf::from),
        })
    }
}

fn parse_opt<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(lookup, name)?.unwrap_or(default))
}
