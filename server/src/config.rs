//! Server configuration

use anyhow::{Context, Result};
use chrono_tz::Tz;
use fingerbot_shared::protocol::{DEFAULT_HTTP_PORT, DEFAULT_STREAM_PORT, HANDSHAKE_TIMEOUT_MS};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScheduleError;

/// Everything the server needs at startup
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP API and WebSocket endpoint
    pub http_addr: SocketAddr,
    /// Framed stream transport
    pub stream_addr: SocketAddr,
    /// Zone all schedule times are evaluated in
    pub timezone: Tz,
    /// How long a new stream connection may take to identify itself
    pub handshake_timeout: Duration,
    /// Interval between server pings on the message transport
    pub keepalive_interval: Duration,
    /// Persisted schedule records to arm on startup
    pub schedules_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_HTTP_PORT)),
            stream_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_STREAM_PORT)),
            timezone: Tz::UTC,
            handshake_timeout: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            keepalive_interval: Duration::from_secs(30),
            schedules_path: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            config.http_addr = addr
                .parse()
                .with_context(|| format!("HTTP_ADDR is not a socket address: {addr}"))?;
        }
        if let Some(addr) = lookup("STREAM_ADDR") {
            config.stream_addr = addr
                .parse()
                .with_context(|| format!("STREAM_ADDR is not a socket address: {addr}"))?;
        }
        if let Some(name) = lookup("SCHEDULE_TZ") {
            config.timezone = parse_timezone(&name)?;
        }
        if let Some(secs) = lookup("HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = parse_secs("HANDSHAKE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("KEEPALIVE_INTERVAL_SECS") {
            config.keepalive_interval = parse_secs("KEEPALIVE_INTERVAL_SECS", &secs)?;
        }
        if let Some(path) = lookup("SCHEDULES_PATH") {
            if !path.is_empty() {
                config.schedules_path = Some(PathBuf::from(path));
            }
        }

        Ok(config)
    }
}

/// Resolve an IANA zone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds: {value}"))?;
    if secs == 0 {
        anyhow::bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.http_addr.port(), 3000);
        assert_eq!(config.stream_addr.port(), 12345);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert!(config.schedules_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:8080"),
            ("SCHEDULE_TZ", "Europe/Berlin"),
            ("KEEPALIVE_INTERVAL_SECS", "10"),
            ("SCHEDULES_PATH", "/var/lib/fingerbot/schedules.json"),
        ]))
        .unwrap();

        assert_eq!(config.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(
            config.schedules_path,
            Some(PathBuf::from("/var/lib/fingerbot/schedules.json"))
        );
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(ServerConfig::from_lookup(lookup(&[("STREAM_ADDR", "nowhere")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("SCHEDULE_TZ", "Mars/Olympus")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("HANDSHAKE_TIMEOUT_SECS", "soon")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("HANDSHAKE_TIMEOUT_SECS", "0")])).is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Asia/Tokyo").unwrap(), chrono_tz::Asia::Tokyo);
        assert_eq!(
            parse_timezone("Nowhere/Land"),
            Err(ScheduleError::InvalidTimezone("Nowhere/Land".into()))
        );
    }
}
