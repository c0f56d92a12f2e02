use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, bail};

use crate::rooms::{PersistPolicy, RoomSettings};

pub const MAX_LOG_APPEND_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub node_id: u16,
    pub room_inbox_capacity: usize,
    pub connection_buffer: usize,
    pub log_append_attempts: u32,
    pub log_retry_backoff: Duration,
    pub fanout_on_persist_failure: bool,
    pub invite_sweep_interval: Duration,
    pub session_inactivity: time::Duration,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://roomcast.db?mode=rwc".to_owned()),
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            node_id: parse(&lookup, "NODE_ID", 1)?,
            room_inbox_capacity: parse(&lookup, "ROOM_INBOX_CAPACITY", 256)?,
            connection_buffer: parse(&lookup, "CONNECTION_BUFFER", 64)?,
            log_append_attempts: parse(&lookup, "LOG_APPEND_ATTEMPTS", 3)?,
            log_retry_backoff: Duration::from_millis(parse(&lookup, "LOG_RETRY_BACKOFF_MS", 50)?),
            fanout_on_persist_failure: parse(&lookup, "FANOUT_ON_PERSIST_FAILURE", true)?,
            invite_sweep_interval: Duration::from_secs(parse(&lookup, "INVITE_SWEEP_SECS", 600)?),
            session_inactivity: time::Duration::minutes(parse(&lookup, "SESSION_INACTIVITY_MINS", 60)?),
        };

        if config.room_inbox_capacity == 0 {
            bail!("ROOM_INBOX_CAPACITY must be at least 1");
        }
        if config.connection_buffer == 0 {
            bail!("CONNECTION_BUFFER must be at least 1");
        }
        if !(1..=MAX_LOG_APPEND_ATTEMPTS).contains(&config.log_append_attempts) {
            bail!("LOG_APPEND_ATTEMPTS must be between 1 and {MAX_LOG_APPEND_ATTEMPTS}");
        }
        if config.invite_sweep_interval.is_zero() {
            bail!("INVITE_SWEEP_SECS must be at least 1");
        }
        Ok(config)
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            inbox_capacity: self.room_inbox_capacity,
            connection_buffer: self.connection_buffer,
            persist: PersistPolicy {
                attempts: self.log_append_attempts,
                backoff: self.log_retry_backoff,
                fanout_on_failure: self.fanout_on_persist_failure,
            },
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
    }
}
