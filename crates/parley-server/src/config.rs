use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::{FixedOffset, NaiveTime};

use parley_gateway::ChatConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub chat: ChatConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key/value source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let defaults = ChatConfig::default();
        let offset_minutes: i32 = parse_or(&lookup, "PARLEY_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60)
            .ok_or_else(|| anyhow!("PARLEY_UTC_OFFSET_MINUTES out of range: {}", offset_minutes))?;

        let chat = ChatConfig {
            break_time: time_or(&lookup, "PARLEY_BREAK_TIME", defaults.break_time)?,
            after_work: time_or(&lookup, "PARLEY_AFTER_WORK", defaults.after_work)?,
            utc_offset,
            sweep_interval: Duration::from_secs(parse_or(&lookup, "PARLEY_SWEEP_INTERVAL_SECS", 60u64)?.max(1)),
            heartbeat_interval: Duration::from_secs(
                parse_or(&lookup, "PARLEY_HEARTBEAT_INTERVAL_SECS", 30u64)?.max(1),
            ),
            outbound_buffer: parse_or(&lookup, "PARLEY_OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            max_content_len: parse_or(&lookup, "PARLEY_MAX_CONTENT_LEN", defaults.max_content_len)?,
            ..defaults
        };

        Ok(Self {
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PARLEY_PORT", 3000)?,
            db_path: lookup("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".into())
                .into(),
            jwt_secret,
            chat,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

/// `HH:MM`, local to the configured offset.
fn time_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: NaiveTime) -> anyhow::Result<NaiveTime> {
    match lookup(key) {
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .with_context(|| format!("invalid {} (expected HH:MM): {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[("PARLEY_JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.chat.break_time, NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(config.chat.after_work, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(config.chat.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.chat.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn placeholder_secrets_abort_startup() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")])).is_err());
    }

    #[test]
    fn delivery_windows_are_configurable() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_BREAK_TIME", "12:30"),
            ("PARLEY_AFTER_WORK", "18:15"),
            ("PARLEY_UTC_OFFSET_MINUTES", "-300"),
        ]))
        .unwrap();
        assert_eq!(config.chat.break_time, NaiveTime::from_hms_opt(12, 30, 0).unwrap());
        assert_eq!(config.chat.after_work, NaiveTime::from_hms_opt(18, 15, 0).unwrap());
        assert_eq!(config.chat.utc_offset.local_minus_utc(), -300 * 60);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_BREAK_TIME", "noon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PARLEY_BREAK_TIME"));
    }
}
