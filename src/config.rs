use crate::error::ConfigError;
use crate::hub::DEFAULT_SUBSCRIBER_BUFFER;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const MIN_COOKIE_SECRET_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Postgres URL. Without it every collaborator runs in memory.
    pub database_url: Option<String>,
    pub cookie_secret: Option<Vec<u8>>,
    pub subscriber_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3333)),
            database_url: None,
            cookie_secret: None,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let host = match lookup("HOST") {
            Some(value) => value.parse::<IpAddr>().map_err(|_| ConfigError::Invalid {
                key: "HOST",
                value,
            })?,
            None => defaults.addr.ip(),
        };
        let port = match lookup("PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value,
            })?,
            None => defaults.addr.port(),
        };
        let subscriber_buffer = match lookup("SUBSCRIBER_BUFFER") {
            Some(value) => match value.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SUBSCRIBER_BUFFER",
                        value,
                    });
                }
            },
            None => defaults.subscriber_buffer,
        };
        let cookie_secret = match lookup("COOKIE_SECRET") {
            Some(secret) if secret.len() < MIN_COOKIE_SECRET_LEN => {
                return Err(ConfigError::CookieSecretTooShort);
            }
            Some(secret) => Some(secret.into_bytes()),
            None => None,
        };

        Ok(Config {
            addr: SocketAddr::new(host, port),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            cookie_secret,
            subscriber_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_run_in_memory() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.addr.port(), 3333);
        assert!(config.database_url.is_none());
        assert!(config.cookie_secret.is_none());
        assert_eq!(config.subscriber_buffer, DEFAULT_SUBSCRIBER_BUFFER);
    }

    #[test]
    fn reads_overrides() {
        let secret = "k".repeat(64);
        let config = config_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/polls"),
            ("COOKIE_SECRET", &secret),
            ("SUBSCRIBER_BUFFER", "8"),
        ])
        .unwrap();

        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/polls"));
        assert_eq!(config.cookie_secret.unwrap().len(), 64);
        assert_eq!(config.subscriber_buffer, 8);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("PORT", "http")]),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("SUBSCRIBER_BUFFER", "0")]),
            Err(ConfigError::Invalid { key: "SUBSCRIBER_BUFFER", .. })
        ));
        assert!(matches!(
            config_from(&[("COOKIE_SECRET", "short")]),
            Err(ConfigError::CookieSecretTooShort)
        ));
    }
}
