use anyhow::{Result, bail};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use duel_types::{MAX_GUESSES, WORD_LENGTH};

/// Server configuration, loaded once from the environment at startup.
/// Any invalid value aborts start with a non-zero exit code.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub ws_rate_limit: u32,
    pub ws_rate_window: Duration,
    pub api_rate_limit: u32,
    pub api_rate_window: Duration,
    pub max_connections_per_ip: usize,
    pub max_connections: usize,
    pub max_concurrent_rooms: usize,
    pub room_inactive_timeout: Duration,
    pub cleanup_interval: Duration,
    pub max_players_per_room: usize,
    pub max_guesses: usize,
    pub word_length: usize,
    pub max_message_size: usize,
    pub log_level: String,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT", 8080)?,
            read_timeout: Duration::from_secs(parse_env("READ_TIMEOUT", 60)?),
            write_timeout: Duration::from_secs(parse_env("WRITE_TIMEOUT", 10)?),
            idle_timeout: Duration::from_secs(parse_env("IDLE_TIMEOUT", 120)?),
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT", 30)?),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            ws_rate_limit: parse_env("WS_RATE_LIMIT", 5)?,
            ws_rate_window: Duration::from_secs(5),
            api_rate_limit: parse_env("API_RATE_LIMIT", 120)?,
            api_rate_window: Duration::from_secs(60),
            max_connections_per_ip: parse_env("MAX_CONNECTIONS_PER_IP", 10)?,
            max_connections: parse_env("MAX_CONNECTIONS", 1000)?,
            max_concurrent_rooms: parse_env("MAX_CONCURRENT_ROOMS", 1000)?,
            room_inactive_timeout: Duration::from_secs(parse_env(
                "ROOM_INACTIVE_TIMEOUT",
                30 * 60,
            )?),
            cleanup_interval: Duration::from_secs(parse_env("CLEANUP_INTERVAL", 5 * 60)?),
            max_players_per_room: parse_env("MAX_PLAYERS_PER_ROOM", 4)?,
            max_guesses: parse_env("MAX_GUESSES", MAX_GUESSES)?,
            word_length: parse_env("WORD_LENGTH", WORD_LENGTH)?,
            max_message_size: parse_env("MAX_MESSAGE_SIZE", 512)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("PORT must be non-zero");
        }
        if self.max_guesses != MAX_GUESSES {
            bail!("MAX_GUESSES must be {MAX_GUESSES}");
        }
        if self.word_length != WORD_LENGTH {
            bail!("WORD_LENGTH must be {WORD_LENGTH}");
        }
        if self.max_message_size == 0 || self.max_message_size > 10 * 1024 {
            bail!("MAX_MESSAGE_SIZE must be between 1 and 10240 bytes");
        }
        if !(2..=10).contains(&self.max_players_per_room) {
            bail!("MAX_PLAYERS_PER_ROOM must be between 2 and 10");
        }
        if self.ws_rate_limit == 0 || self.api_rate_limit == 0 {
            bail!("rate limits must be non-zero");
        }
        if self.max_connections == 0 || self.max_connections_per_ip == 0 {
            bail!("connection limits must be non-zero");
        }
        for timeout in [
            self.read_timeout,
            self.write_timeout,
            self.shutdown_timeout,
            self.cleanup_interval,
            self.room_inactive_timeout,
        ] {
            if timeout.is_zero() {
                bail!("timeouts must be non-zero");
            }
        }
        Ok(())
    }

    /// True when any origin is accepted (dev default).
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            allowed_origins: vec!["*".to_string()],
            ws_rate_limit: 5,
            ws_rate_window: Duration::from_secs(5),
            api_rate_limit: 120,
            api_rate_window: Duration::from_secs(60),
            max_connections_per_ip: 10,
            max_connections: 1000,
            max_concurrent_rooms: 1000,
            room_inactive_timeout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            max_players_per_room: 4,
            max_guesses: MAX_GUESSES,
            word_length: WORD_LENGTH,
            max_message_size: 512,
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}

fn parse_env<T: FromStr + std::fmt::Display>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => bail!("invalid {key}: {raw:?}"),
        },
        Err(_) => Ok(default),
    }
}
