//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database (absent means the in-memory store, for development)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Payment webhook
    pub payment_webhook_secret: String,

    // Gateway
    pub max_input_bytes: usize,
    pub backend_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL").ok(),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            // Payment webhook
            payment_webhook_secret: {
                let secret = env::var("PAYMENT_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::Missing("PAYMENT_WEBHOOK_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "PAYMENT_WEBHOOK_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Gateway
            max_input_bytes: env::var("MAX_INPUT_BYTES")
                .unwrap_or_else(|_| "65536".to_string()) // 64 KiB default
                .parse()
                .unwrap_or(65536),
            backend_timeout_ms: env::var("BACKEND_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30000),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config tests mutate shared env vars, run serially
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_webhook_secret_validation() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        env::remove_var("PAYMENT_WEBHOOK_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("PAYMENT_WEBHOOK_SECRET"))
        ));

        env::set_var("PAYMENT_WEBHOOK_SECRET", "short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        env::set_var(
            "PAYMENT_WEBHOOK_SECRET",
            "whsec-test-secret-at-least-32-characters",
        );
        let config = Config::from_env().unwrap();
        assert_eq!(config.max_input_bytes, 65536);
        assert_eq!(config.backend_timeout_ms, 30000);

        env::remove_var("PAYMENT_WEBHOOK_SECRET");
    }
}
