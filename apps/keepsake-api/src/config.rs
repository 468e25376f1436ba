use std::time::Duration;

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (database holding `auth_user`).
    pub database_url: String,
    /// Redis connection string for the presence set.
    pub redis_url: String,
    /// HS256 secret that access tokens are signed with.
    pub secret_key: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// TTL applied to the whole `online_users` set on every add.
    pub presence_ttl_secs: u64,
    /// Interval between PING frames on an open connection.
    pub heartbeat_interval: Duration,
    /// When set, connections that miss PONGs for longer than
    /// `heartbeat_interval + heartbeat_timeout` are closed.
    pub heartbeat_timeout: Option<Duration>,
    /// Inbound frames larger than this are answered with an ERROR frame.
    pub max_frame_bytes: usize,
}

pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 3600;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 65_536;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| {
                let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
                format!("redis://{host}:6379/0")
            }),
            secret_key: required_var("SECRET_KEY"),
            port: parsed_var("PORT").unwrap_or(8000),
            presence_ttl_secs: parsed_var("PRESENCE_TTL_SECS").unwrap_or(DEFAULT_PRESENCE_TTL_SECS),
            heartbeat_interval: heartbeat_interval(parsed_var("HEARTBEAT_INTERVAL_MS")),
            heartbeat_timeout: parsed_var("HEARTBEAT_TIMEOUT_MS").map(Duration::from_millis),
            max_frame_bytes: parsed_var("MAX_FRAME_BYTES").unwrap_or(DEFAULT_MAX_FRAME_BYTES),
        }
    }
}

/// A zero interval is not a valid tick period; it falls back to the default.
fn heartbeat_interval(ms: Option<u64>) -> Duration {
    match ms {
        Some(0) => {
            tracing::warn!(
                default_ms = DEFAULT_HEARTBEAT_INTERVAL_MS,
                "HEARTBEAT_INTERVAL_MS must be positive, using the default"
            );
            Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)
        }
        Some(ms) => Duration::from_millis(ms),
        None => Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_interval_rejects_zero() {
        let default = Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(heartbeat_interval(Some(0)), default);
        assert_eq!(heartbeat_interval(None), default);
        assert_eq!(heartbeat_interval(Some(250)), Duration::from_millis(250));
    }
}
