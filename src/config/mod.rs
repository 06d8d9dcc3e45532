use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::Catalog;

const DEFAULT_DATABASE_URL: &str = "sqlite:live_tally.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub catalog: Catalog,
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    /// Shared secret for reset and QR uploads. `None` disables both.
    pub admin_token: Option<String>,
    pub sweep_interval: Duration,
    pub wipe_on_start: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let options = get("SURVEY_OPTIONS").ok_or(ConfigError::Missing("SURVEY_OPTIONS"))?;
        let catalog = Catalog::parse(&options)?;

        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        // Each pooled connection would open its own empty in-memory database.
        if is_in_memory(&database_url) {
            return Err(invalid("DATABASE_URL", &database_url));
        }

        let max_connections = parse_or(
            "DATABASE_MAX_CONNECTIONS",
            get("DATABASE_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        if max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "0"));
        }

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.trim().parse().map_err(|_| invalid("BIND_ADDR", &raw))?,
            None => DEFAULT_BIND_ADDR
                .parse()
                .map_err(|_| invalid("BIND_ADDR", DEFAULT_BIND_ADDR))?,
        };

        let sweep_secs = parse_or(
            "SWEEP_INTERVAL_SECS",
            get("SWEEP_INTERVAL_SECS"),
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?;
        if sweep_secs == 0 {
            return Err(invalid("SWEEP_INTERVAL_SECS", "0"));
        }

        let wipe_on_start = match get("WIPE_ON_START") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| invalid("WIPE_ON_START", &raw))?,
            None => false,
        };

        Ok(Self {
            catalog,
            database_url,
            max_connections,
            bind_addr,
            admin_token: get("ADMIN_TOKEN").map(|token| token.trim().to_string()),
            sweep_interval: Duration::from_secs(sweep_secs),
            wipe_on_start,
        })
    }
}

fn parse_or<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let settings = settings(&[("SURVEY_OPTIONS", "Rust, Go, Zig")]).unwrap();
        assert_eq!(settings.catalog.options(), ["Rust", "Go", "Zig"]);
        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(settings.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(settings.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(settings.admin_token, None);
        assert_eq!(settings.sweep_interval, Duration::from_secs(30));
        assert!(!settings.wipe_on_start);
    }

    #[test]
    fn overrides_apply() {
        let settings = settings(&[
            ("SURVEY_OPTIONS", "A,B"),
            ("DATABASE_URL", "sqlite:/var/lib/tally.db"),
            ("DATABASE_MAX_CONNECTIONS", "1"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("ADMIN_TOKEN", " hunter2 "),
            ("SWEEP_INTERVAL_SECS", "5"),
            ("WIPE_ON_START", "yes"),
        ])
        .unwrap();
        assert_eq!(settings.database_url, "sqlite:/var/lib/tally.db");
        assert_eq!(settings.max_connections, 1);
        assert_eq!(settings.bind_addr.port(), 8080);
        assert_eq!(settings.admin_token.as_deref(), Some("hunter2"));
        assert_eq!(settings.sweep_interval, Duration::from_secs(5));
        assert!(settings.wipe_on_start);
    }

    #[test]
    fn options_are_required() {
        assert!(matches!(settings(&[]), Err(ConfigError::Missing("SURVEY_OPTIONS"))));
        assert!(matches!(
            settings(&[("SURVEY_OPTIONS", " , ")]),
            Err(ConfigError::EmptyCatalog(_))
        ));
    }

    #[test]
    fn bad_values_are_reported() {
        for (key, value) in [
            ("BIND_ADDR", "localhost"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("SWEEP_INTERVAL_SECS", "soon"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("WIPE_ON_START", "maybe"),
        ] {
            let err = settings(&[("SURVEY_OPTIONS", "A"), (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{} = {:?} gave {:?}",
                key,
                value,
                err
            );
        }
    }

    #[test]
    fn in_memory_database_is_rejected() {
        for url in ["sqlite::memory:", "sqlite:file:tally?mode=memory&cache=shared"] {
            let err = settings(&[("SURVEY_OPTIONS", "A"), ("DATABASE_URL", url)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "DATABASE_URL", .. }));
        }
    }

    #[test]
    fn blank_token_counts_as_unset() {
        let settings = settings(&[("SURVEY_OPTIONS", "A"), ("ADMIN_TOKEN", "   ")]).unwrap();
        assert_eq!(settings.admin_token, None);
    }
}
