use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub frontend_url: String,
    pub google: Option<GoogleConfig>,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup so tests don't have to touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let google = match (
            lookup("GOOGLE_CLIENT_ID"),
            lookup("GOOGLE_CLIENT_SECRET"),
            lookup("GOOGLE_CALLBACK_URL"),
        ) {
            (Some(client_id), Some(client_secret), Some(callback_url)) => Some(GoogleConfig {
                client_id,
                client_secret,
                callback_url,
            }),
            _ => {
                info!("Google OAuth not configured, /api/auth/google disabled");
                None
            }
        };

        Ok(Self {
            port: try_load(&lookup, "PORT", "5000")?,
            database_url: required(&lookup, "DATABASE_URL")?,
            database_max_connections: try_load(&lookup, "DATABASE_MAX_CONNECTIONS", "10")?,
            jwt_secret: required(&lookup, "JWT_SECRET")?,
            jwt_ttl_hours: try_load(&lookup, "JWT_TTL_HOURS", "168")?,
            upload_dir: try_load(&lookup, "UPLOAD_DIR", "./uploads")?,
            frontend_url: try_load(&lookup, "FRONTEND_URL", "http://localhost:3000")?,
            google,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow!("{key} not set"))
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            anyhow!("{e}")
        })
        .with_context(|| format!("environment misconfigured: {key}"))
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
    fn defaults_apply_when_optional_values_missing() {
        let cfg = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/lms"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.jwt_ttl_hours, 168);
        assert_eq!(cfg.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(cfg.frontend_url, "http://localhost:3000");
        assert!(cfg.google.is_none());
    }

    #[test]
    fn missing_jwt_secret_is_an_error() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/lms")]))
            .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/lms"),
            ("JWT_SECRET", "secret"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn google_needs_all_three_values() {
        let partial = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/lms"),
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "id"),
        ]))
        .unwrap();
        assert!(partial.google.is_none());

        let full = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/lms"),
            ("JWT_SECRET", "secret"),
            ("GOOGLE_CLIENT_ID", "id"),
            ("GOOGLE_CLIENT_SECRET", "shh"),
            ("GOOGLE_CALLBACK_URL", "http://localhost:5000/api/auth/google/callback"),
        ]))
        .unwrap();
        assert_eq!(full.google.unwrap().client_id, "id");
    }
}
