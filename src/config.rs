use std::{env, fmt::Display, str::FromStr};

use log::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),

    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub pool_size: u32,
    pub production: bool,
    pub sweep_interval_secs: u64,
    pub amqp: AmqpConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let sweep_interval_secs = parse_or(&lookup, "COMPLETION_SWEEP_SECS", 3600)?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "COMPLETION_SWEEP_SECS",
                value: "0".to_owned(),
                reason: "must be at least one second".to_owned(),
            });
        }

        Ok(Self {
            database_url,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_owned()),
            port: parse_or(&lookup, "PORT", 8800)?,
            pool_size: parse_or(&lookup, "DB_POOL_SIZE", 10)?,
            production: lookup("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production")),
            sweep_interval_secs,
            amqp: AmqpConfig {
                enabled: parse_or(&lookup, "AMQP_ENABLED", true)?,
                host: lookup("AMQP_HOST").unwrap_or_else(|| "localhost".to_owned()),
                port: parse_or(&lookup, "AMQP_PORT", 5672)?,
                username: lookup("AMQP_USER").unwrap_or_else(|| "guest".to_owned()),
                password: lookup("AMQP_PASSWORD").unwrap_or_else(|| "guest".to_owned()),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_is_set() {
        let config =
            Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/guides")]))
                .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8800);
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.sweep_interval_secs, 3600);
        assert!(!config.production);
        assert!(config.amqp.enabled);
        assert_eq!(config.amqp.port, 5672);
        assert_eq!(config.amqp.username, "guest");
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL should be set");
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/guides"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn production_and_broker_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/guides"),
            ("APP_ENV", "Production"),
            ("AMQP_ENABLED", "false"),
            ("AMQP_HOST", "rabbit"),
        ]))
        .unwrap();
        assert!(config.production);
        assert!(!config.amqp.enabled);
        assert_eq!(config.amqp.host, "rabbit");
    }

    #[test]
    fn completion_sweep_needs_a_positive_interval() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/guides"),
            ("COMPLETION_SWEEP_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "COMPLETION_SWEEP_SECS", .. }));

        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/guides"),
            ("COMPLETION_SWEEP_SECS", "900"),
        ]))
        .unwrap();
        assert_eq!(config.sweep_interval_secs, 900);
    }
}
