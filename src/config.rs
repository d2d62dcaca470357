use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Runtime settings, read from `.env` and the process environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Sessions expire after this long without a request.
    pub session_ttl: time::Duration,
    /// Longest a single push may wait on a full outbox.
    pub push_timeout: Duration,
    /// Per-connection outbox capacity.
    pub push_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// Clear every persisted online flag at startup.
    pub reset_presence_on_boot: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://chat.db?mode=rwc".to_owned(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            session_ttl: time::Duration::days(30),
            push_timeout: Duration::from_millis(250),
            push_queue: 64,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            reset_presence_on_boot: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let session_ttl_days: i64 = parse(&lookup, "SESSION_TTL_DAYS")?
            .unwrap_or(defaults.session_ttl.whole_days());
        let push_timeout_ms: u64 = parse(&lookup, "PUSH_TIMEOUT_MS")?
            .unwrap_or(defaults.push_timeout.as_millis() as u64);
        let heartbeat_secs: u64 = parse(&lookup, "HEARTBEAT_SECS")?
            .unwrap_or(defaults.heartbeat_interval.as_secs());
        let client_timeout_secs: u64 = parse(&lookup, "CLIENT_TIMEOUT_SECS")?
            .unwrap_or(defaults.client_timeout.as_secs());

        if heartbeat_secs == 0 {
            anyhow::bail!("HEARTBEAT_SECS must be positive");
        }
        if client_timeout_secs <= heartbeat_secs {
            anyhow::bail!("CLIENT_TIMEOUT_SECS must be longer than HEARTBEAT_SECS");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: parse(&lookup, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            session_ttl: time::Duration::days(session_ttl_days),
            push_timeout: Duration::from_millis(push_timeout_ms),
            push_queue: parse(&lookup, "PUSH_QUEUE")?.unwrap_or(defaults.push_queue),
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            client_timeout: Duration::from_secs(client_timeout_secs),
            reset_presence_on_boot: parse(&lookup, "RESET_PRESENCE_ON_BOOT")?
                .unwrap_or(defaults.reset_presence_on_boot),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {key}: {raw:?}")))
        .transpose()
}
