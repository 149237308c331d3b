use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Public key whose host terminal may call the cross-tenant admin
    /// services.
    pub admin_public_key: Option<String>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_attempts: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let probe_interval_ms = env::var("PROBE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        let probe_timeout_ms = env::var("PROBE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);
        let probe_attempts = env::var("PROBE_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        Self {
            port: env::var("SWITCHBOARD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            admin_public_key: env::var("SWITCHBOARD_ADMIN_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            probe_interval: Duration::from_millis(probe_interval_ms),
            probe_timeout: Duration::from_millis(probe_timeout_ms),
            probe_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            admin_public_key: None,
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            probe_attempts: 3,
        }
    }
}
