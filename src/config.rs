use std::collections::HashMap;

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{FeeSchedule, Money};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub processor_api_url: String,
    pub processor_environment: ProcessorEnvironment,
    pub processor_developer_id: String,
    pub processor_timeout_secs: u64,
    /// Fractional percentage fee rate applied to every charge.
    pub fee_percentage: Decimal,
    /// Fixed per-charge fee in dollars.
    pub fee_fixed: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEnvironment {
    Sandbox,
    Production,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let processor_environment = match env_map
            .get("PROCESSOR_ENVIRONMENT")
            .map(|s| s.as_str())
            .unwrap_or("sandbox")
        {
            "sandbox" => ProcessorEnvironment::Sandbox,
            "production" => ProcessorEnvironment::Production,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PROCESSOR_ENVIRONMENT".to_string(),
                    format!("must be sandbox or production, got {}", other),
                ))
            }
        };

        let processor_api_url = match env_map.get("PROCESSOR_API_URL") {
            Some(url) => url.clone(),
            None => match processor_environment {
                ProcessorEnvironment::Sandbox => "https://api.sandbox.fortis.tech/v1".to_string(),
                ProcessorEnvironment::Production => "https://api.fortis.tech/v1".to_string(),
            },
        };

        let processor_developer_id = env_map
            .get("PROCESSOR_DEVELOPER_ID")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("PROCESSOR_DEVELOPER_ID".to_string()))?;

        let processor_timeout_secs = env_map
            .get("PROCESSOR_TIMEOUT_SECS")
            .map(|s| s.as_str())
            .unwrap_or("30")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "PROCESSOR_TIMEOUT_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let fee_percentage = Decimal::from_str(
            env_map
                .get("FEE_PERCENTAGE")
                .map(|s| s.as_str())
                .unwrap_or("0.023"),
        )
        .map_err(|_| {
            ConfigError::InvalidValue(
                "FEE_PERCENTAGE".to_string(),
                "must be a valid decimal".to_string(),
            )
        })?;

        let fee_fixed = Money::from_str_canonical(
            env_map
                .get("FEE_FIXED")
                .map(|s| s.as_str())
                .unwrap_or("0.30"),
        )
        .map_err(|_| {
            ConfigError::InvalidValue(
                "FEE_FIXED".to_string(),
                "must be a valid decimal".to_string(),
            )
        })?;

        Ok(Config {
            port,
            database_path,
            processor_api_url,
            processor_environment,
            processor_developer_id,
            processor_timeout_secs,
            fee_percentage,
            fee_fixed,
        })
    }

    pub fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule::new(self.fee_percentage, self.fee_fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert("PROCESSOR_DEVELOPER_ID".to_string(), "dev_123".to_string());
        map
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_developer_id() {
        let mut env_map = setup_required_env();
        env_map.remove("PROCESSOR_DEVELOPER_ID");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "PROCESSOR_DEVELOPER_ID"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_environment() {
        let mut env_map = setup_required_env();
        env_map.insert("PROCESSOR_ENVIRONMENT".to_string(), "staging".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PROCESSOR_ENVIRONMENT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_environment_selects_base_url() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "PROCESSOR_ENVIRONMENT".to_string(),
            "production".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.processor_api_url, "https://api.fortis.tech/v1");
        assert_eq!(
            config.processor_environment,
            ProcessorEnvironment::Production
        );
    }

    #[test]
    fn test_default_fee_schedule() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        let schedule = config.fee_schedule();
        assert_eq!(schedule.percentage, Decimal::from_str("0.023").unwrap());
        assert_eq!(schedule.fixed, Money::from_str_canonical("0.30").unwrap());
        assert_eq!(config.processor_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_fee_percentage() {
        let mut env_map = setup_required_env();
        env_map.insert("FEE_PERCENTAGE".to_string(), "two percent".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "FEE_PERCENTAGE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
