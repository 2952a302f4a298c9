use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("retry_interval_ms ({retry}) must be longer than poll_interval_ms ({poll})")]
    RetryNotLonger { poll: u64, retry: u64 },
    #[error("invalid label_env_var `{0}`")]
    LabelEnvVar(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Delay between two polls while the runtime is reachable.
    pub poll_interval_ms: u64,
    /// Delay between two pings while the runtime is unreachable.
    pub retry_interval_ms: u64,
    /// Environment variable marking a container as a microservice.
    pub label_env_var: String,
    /// Bound of the notification channel.
    pub channel_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            retry_interval_ms: 5_000,
            label_env_var: "MICROSERVICE_LABEL".into(),
            channel_capacity: 100,
            docker_socket: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("ms-tracker.toml"))
            .merge(Json::file("ms-tracker.json"))
            .merge(Env::prefixed("MS_TRACKER_"))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        if self.retry_interval_ms <= self.poll_interval_ms {
            return Err(ConfigError::RetryNotLonger {
                poll: self.poll_interval_ms,
                retry: self.retry_interval_ms,
            });
        }
        if self.label_env_var.is_empty() || self.label_env_var.contains('=') {
            return Err(ConfigError::LabelEnvVar(self.label_env_var.clone()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
        assert!(config.retry_interval() > config.poll_interval());
    }

    #[test]
    fn test_retry_must_be_longer_than_poll() {
        let config = Config {
            poll_interval_ms: 5_000,
            retry_interval_ms: 5_000,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::RetryNotLonger {
                poll: 5_000,
                retry: 5_000
            })
        );
    }

    #[test]
    fn test_rejects_bad_label_env_var() {
        for bad in ["", "LABEL=x"] {
            let config = Config {
                label_env_var: bad.into(),
                ..Config::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::LabelEnvVar(bad.into())));
        }
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = Config {
            channel_capacity: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("channel_capacity")));
    }

    #[test]
    fn test_layered_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "ms-tracker.toml",
                r#"
                poll_interval_ms = 1000
                label_env_var = "SERVICE_NAME"
                "#,
            )?;
            jail.set_env("MS_TRACKER_RETRY_INTERVAL_MS", "9000");

            let config = Config::from_figment(Config::figment()).unwrap();
            assert_eq!(config.poll_interval_ms, 1000);
            assert_eq!(config.retry_interval_ms, 9000);
            assert_eq!(config.label_env_var, "SERVICE_NAME");
            assert_eq!(config.channel_capacity, 100);
            assert!(config.docker_socket.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_layered_config_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MS_TRACKER_RETRY_INTERVAL_MS", "1000");
            assert!(Config::from_figment(Config::figment()).is_err());
            Ok(())
        });
    }
}
