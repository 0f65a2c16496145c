use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::warn;

/// Secrets that only exist so the server starts in development.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me-to-a-random-string"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub session_ttl: chrono::Duration,
}

impl Config {
    /// Read `ALGONOTES_*` variables from the environment (and `.env`, loaded
    /// by the caller).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("ALGONOTES_JWT_SECRET").unwrap_or_default();
        let jwt_secret = if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("ALGONOTES_JWT_SECRET is unset or a placeholder; sessions are forgeable");
            "dev-secret-change-me".to_string()
        } else {
            jwt_secret
        };

        let db_path = get("ALGONOTES_DB_PATH").unwrap_or_else(|| "algonotes.db".into());
        let host = get("ALGONOTES_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("ALGONOTES_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("ALGONOTES_PORT must be a port number")?;
        let ttl_days: i64 = get("ALGONOTES_SESSION_TTL_DAYS")
            .unwrap_or_else(|| "7".into())
            .parse()
            .context("ALGONOTES_SESSION_TTL_DAYS must be a whole number of days")?;
        if ttl_days <= 0 {
            anyhow::bail!("ALGONOTES_SESSION_TTL_DAYS must be positive");
        }

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            addr: format!("{}:{}", host, port)
                .parse()
                .with_context(|| format!("invalid listen address {}:{}", host, port))?,
            session_ttl: chrono::Duration::days(ttl_days),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("algonotes.db"));
        assert_eq!(cfg.session_ttl, chrono::Duration::days(7));
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = config(&[
            ("ALGONOTES_JWT_SECRET", "s3cret"),
            ("ALGONOTES_HOST", "127.0.0.1"),
            ("ALGONOTES_PORT", "8080"),
            ("ALGONOTES_SESSION_TTL_DAYS", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.session_ttl, chrono::Duration::days(1));

        assert!(config(&[("ALGONOTES_PORT", "http")]).is_err());
        assert!(config(&[("ALGONOTES_SESSION_TTL_DAYS", "0")]).is_err());
    }
}
