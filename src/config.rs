use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub mod source_accounts;

use source_accounts::SourceAccounts;

pub const FLAG_INCOMING: &str = "incoming-payments-processing";
pub const FLAG_BANKING_CIRCLE: &str = "banking-circle-processing";
pub const FLAG_UNCHECKED: &str = "unchecked-payments-processing";
pub const FLAG_PAYMENT_UPDATES: &str = "payment-updates-processing";
pub const FLAG_ACQUIRING_HOST: &str = "acquiring-host-export";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub provider: ProviderConfig,
    pub submit_attempts: u32,
    pub submit_retry_delay: Duration,
    pub status_check_max_iterations: u32,
    pub status_check_delay: Duration,
    pub queues: QueueNames,
    pub incoming: ListenerSettings,
    pub banking_circle: ListenerSettings,
    pub unchecked: ListenerSettings,
    pub payment_updates: ListenerSettings,
    pub failed_payments_threshold: u32,
    pub acquiring_host_flag: String,
    pub source_accounts: SourceAccounts,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub api_timeout: Duration,
    pub token_refresh_margin: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueNames {
    pub incoming: String,
    pub incoming_dlq: Option<String>,
    pub banking_circle: String,
    pub banking_circle_dlq: Option<String>,
    pub islandsbanki: String,
    pub unchecked: String,
    pub unchecked_dlq: Option<String>,
    pub payment_updates: String,
    pub payment_updates_dlq: Option<String>,
    pub acquiring_host: String,
}

/// Per-queue listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub feature_flag: String,
    pub workers: usize,
    pub receive_batch_size: usize,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
    pub delay_between_messages: Duration,
    pub delete_retries: u32,
    pub delete_retry_sleep: Duration,
    pub disabled_sleep: Duration,
    pub receive_error_sleep: Duration,
}

impl ListenerSettings {
    pub fn new(feature_flag: impl Into<String>) -> Self {
        Self {
            feature_flag: feature_flag.into(),
            workers: 1,
            receive_batch_size: 1,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
            delay_between_messages: Duration::ZERO,
            delete_retries: 3,
            delete_retry_sleep: Duration::from_millis(500),
            disabled_sleep: Duration::from_secs(5),
            receive_error_sleep: Duration::from_secs(2),
        }
    }

    fn from_env(prefix: &str, feature_flag: &str) -> anyhow::Result<Self> {
        let defaults = Self::new(feature_flag);
        Ok(Self {
            feature_flag: env_or(&format!("{prefix}_FLAG"), feature_flag.to_string())?,
            workers: env_or(&format!("{prefix}_WORKERS"), defaults.workers)?,
            receive_batch_size: env_or(&format!("{prefix}_BATCH_SIZE"), defaults.receive_batch_size)?,
            wait_time: secs(env_or(&format!("{prefix}_WAIT_SECS"), 20)?),
            visibility_timeout: secs(env_or(&format!("{prefix}_VISIBILITY_SECS"), 60)?),
            delay_between_messages: Duration::from_millis(env_or(&format!("{prefix}_DELAY_MS"), 0)?),
            delete_retries: env_or("DELETE_RETRIES", defaults.delete_retries)?,
            delete_retry_sleep: Duration::from_millis(env_or("DELETE_RETRY_SLEEP_MS", 500)?),
            disabled_sleep: secs(env_or("DISABLED_SLEEP_SECS", 5)?),
            receive_error_sleep: defaults.receive_error_sleep,
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let provider = ProviderConfig {
            base_url: env::var("BANKING_CIRCLE_BASE_URL").context("BANKING_CIRCLE_BASE_URL is required")?,
            auth_url: env::var("BANKING_CIRCLE_AUTH_URL").context("BANKING_CIRCLE_AUTH_URL is required")?,
            username: env::var("BANKING_CIRCLE_USERNAME").context("BANKING_CIRCLE_USERNAME is required")?,
            password: env::var("BANKING_CIRCLE_PASSWORD").context("BANKING_CIRCLE_PASSWORD is required")?,
            client_cert_path: optional("BANKING_CIRCLE_CERT_PATH"),
            client_key_path: optional("BANKING_CIRCLE_KEY_PATH"),
            api_timeout: secs(env_or("API_TIMEOUT_SECS", 30)?),
            token_refresh_margin: secs(env_or("TOKEN_REFRESH_MARGIN_SECS", 60)?),
        };

        let queues = QueueNames {
            incoming: env_or("INCOMING_QUEUE", "incoming-payments".to_string())?,
            incoming_dlq: optional("INCOMING_DLQ"),
            banking_circle: env_or("BANKING_CIRCLE_QUEUE", "banking-circle-unprocessed".to_string())?,
            banking_circle_dlq: optional("BANKING_CIRCLE_DLQ"),
            islandsbanki: env_or("ISLANDSBANKI_QUEUE", "islandsbanki-payments".to_string())?,
            unchecked: env_or("UNCHECKED_QUEUE", "banking-circle-unchecked".to_string())?,
            unchecked_dlq: optional("UNCHECKED_DLQ"),
            payment_updates: env_or("PAYMENT_UPDATES_QUEUE", "payment-updates".to_string())?,
            payment_updates_dlq: optional("PAYMENT_UPDATES_DLQ"),
            acquiring_host: env_or("ACQUIRING_HOST_QUEUE", "acquiring-host-export".to_string())?,
        };

        let source_accounts = SourceAccounts::from_json(&env::var("SOURCE_ACCOUNTS").unwrap_or_default())
            .context("SOURCE_ACCOUNTS is not a valid source account table")?;

        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            provider,
            submit_attempts: env_or("SUBMIT_ATTEMPTS", 5)?,
            submit_retry_delay: secs(env_or("SUBMIT_RETRY_DELAY_SECS", 30)?),
            status_check_max_iterations: env_or("STATUS_CHECK_MAX_ITERATIONS", 10)?,
            status_check_delay: secs(env_or("STATUS_CHECK_DELAY_SECS", 5)?),
            queues,
            incoming: ListenerSettings::from_env("INCOMING", FLAG_INCOMING)?,
            banking_circle: ListenerSettings::from_env("BANKING_CIRCLE", FLAG_BANKING_CIRCLE)?,
            unchecked: ListenerSettings::from_env("UNCHECKED", FLAG_UNCHECKED)?,
            payment_updates: ListenerSettings::from_env("PAYMENT_UPDATES", FLAG_PAYMENT_UPDATES)?,
            failed_payments_threshold: env_or("FAILED_PAYMENTS_THRESHOLD", 10)?,
            acquiring_host_flag: env_or("ACQUIRING_HOST_FLAG", FLAG_ACQUIRING_HOST.to_string())?,
            source_accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        assert_eq!(env_or("SETTLEMENT_PAYMENTS_TEST_UNSET", 42u32).unwrap(), 42);
    }

    #[test]
    fn env_or_rejects_garbage() {
        env::set_var("SETTLEMENT_PAYMENTS_TEST_GARBAGE", "ten");
        assert!(env_or("SETTLEMENT_PAYMENTS_TEST_GARBAGE", 1u32).is_err());
        env::remove_var("SETTLEMENT_PAYMENTS_TEST_GARBAGE");
    }

    #[test]
    fn listener_defaults() {
        let settings = ListenerSettings::new(FLAG_UNCHECKED);
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.receive_batch_size, 1);
        assert_eq!(settings.disabled_sleep, Duration::from_secs(5));
        assert_eq!(settings.receive_error_sleep, Duration::from_secs(2));
    }
}
