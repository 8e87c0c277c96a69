use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// Concurrent logins kept per user; older sessions are evicted on login.
    pub max_active_sessions: i64,
    pub session_sweep_interval_secs: u64,
    pub n8n_base_url: Option<String>,
    pub n8n_api_key: Option<String>,
    pub bootstrap_superadmin: Option<(String, String)>,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn positive<T: std::str::FromStr + PartialOrd + Default>(
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = non_empty("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
        let bind_addr = non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let bootstrap_superadmin = match (
            non_empty("BOOTSTRAP_SUPERADMIN_EMAIL"),
            non_empty("BOOTSTRAP_SUPERADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours: positive("SESSION_TTL_HOURS", 24)?,
            max_active_sessions: positive("MAX_ACTIVE_SESSIONS", 2)?,
            session_sweep_interval_secs: positive("SESSION_SWEEP_INTERVAL_SECS", 300)?,
            n8n_base_url: non_empty("N8N_BASE_URL"),
            n8n_api_key: non_empty("N8N_API_KEY"),
            bootstrap_superadmin,
        })
    }
}
