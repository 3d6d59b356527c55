use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::AppError;

/// Server-side ping/pong watchdog settings shared by every session.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub client_timeout: Duration,
}

impl HeartbeatConfig {
    pub fn new(interval_secs: u64, client_timeout_secs: u64) -> Result<Self, AppError> {
        if client_timeout_secs <= interval_secs {
            return Err(AppError::Config(
                "CLIENT_TIMEOUT_SECS must exceed HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }
        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            client_timeout: Duration::from_secs(client_timeout_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    fn env_secs(name: &str, default: u64) -> u64 {
        env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let heartbeat = HeartbeatConfig::new(
            Self::env_secs("HEARTBEAT_INTERVAL_SECS", 5),
            Self::env_secs("CLIENT_TIMEOUT_SECS", 30),
        )?;

        Ok(Self {
            port,
            jwt_secret,
            heartbeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_config_valid() {
        let hb = HeartbeatConfig::new(5, 30).expect("valid heartbeat config");
        assert_eq!(hb.interval, Duration::from_secs(5));
        assert_eq!(hb.client_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_heartbeat_config_rejects_timeout_below_interval() {
        assert!(HeartbeatConfig::new(30, 30).is_err());
        assert!(HeartbeatConfig::new(30, 5).is_err());
    }
}
