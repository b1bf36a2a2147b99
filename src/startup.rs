use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub provider: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.provider
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Banking Circle API:    {}", status(self.provider));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        provider: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_provider(&config.provider.base_url).await {
        report.provider = false;
        report.errors.push(format!("Banking Circle: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.provider.username.is_empty() || config.provider.password.is_empty() {
        anyhow::bail!("Banking Circle credentials are empty");
    }
    if config.provider.client_cert_path.is_some() != config.provider.client_key_path.is_some() {
        anyhow::bail!("BANKING_CIRCLE_CERT_PATH and BANKING_CIRCLE_KEY_PATH must be set together");
    }
    if config.source_accounts.is_empty() {
        anyhow::bail!("SOURCE_ACCOUNTS has no entries");
    }
    if config.failed_payments_threshold == 0 {
        anyhow::bail!("FAILED_PAYMENTS_THRESHOLD must be greater than 0");
    }
    if config.provider.token_refresh_margin >= Duration::from_secs(3600) {
        anyhow::bail!("TOKEN_REFRESH_MARGIN_SECS must be under an hour");
    }

    url::Url::parse(&config.provider.base_url).context("BANKING_CIRCLE_BASE_URL is not a valid URL")?;
    url::Url::parse(&config.provider.auth_url).context("BANKING_CIRCLE_AUTH_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

/// Any HTTP response counts as reachable; the API answers unauthenticated probes with 401.
async fn validate_provider(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .context("Failed to connect to Banking Circle")?;

    if response.status().is_server_error() {
        anyhow::bail!("Banking Circle returned status: {}", response.status());
    }

    Ok(())
}
