use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::PaymentInstruction;
use crate::error::AppError;
use crate::ports::{PaymentStore, StoreError};
use crate::provider::PaymentProviderApi;

#[derive(Parser)]
#[command(name = "settlement-payments")]
#[command(about = "Settlement payments - merchant payout orchestration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the queue listeners (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Payment lookup commands
    #[command(subcommand)]
    Payment(PaymentCommands),

    /// Banking Circle reports
    #[command(subcommand)]
    Provider(ProviderCommands),
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Show a payment aggregate with its event history
    Show {
        #[arg(value_name = "PAYMENT_ID")]
        id: Uuid,
    },

    /// List payments created from one incoming correlation id
    ByCorrelation {
        #[arg(value_name = "CORRELATION_ID")]
        correlation_id: String,
    },
}

#[derive(Subcommand)]
pub enum ProviderCommands {
    /// Payments rejected by Banking Circle on a transaction date
    RejectionReport {
        /// Transaction date (YYYY-MM-DD)
        #[arg(short, long)]
        date: NaiveDate,
    },

    /// Balances of a Banking Circle account
    Balance {
        /// Banking Circle account id
        #[arg(short, long)]
        account: String,
    },
}

pub async fn handle_db_migrate(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Running database migrations...");
    crate::db::migrate(pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Banking Circle API: {}", config.provider.base_url);
    println!("  Banking Circle auth: {}", config.provider.auth_url);
    println!("  Source accounts: {}", config.source_accounts.len());
    println!("  Submit attempts: {}", config.submit_attempts);
    println!("  Status check iterations: {}", config.status_check_max_iterations);
    println!("  Failed payments threshold: {}", config.failed_payments_threshold);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_payment_show(store: &dyn PaymentStore, id: Uuid) -> Result<(), AppError> {
    let payment = match store.get(id).await {
        Ok(payment) => payment,
        Err(StoreError::NotFound(_)) => return Err(AppError::NotFound(format!("payment {id}"))),
        Err(e) => return Err(e.into()),
    };

    print_payment(&payment);
    for event in payment.events() {
        let failure = event
            .failure()
            .map(|f| format!(" ({:?}: {})", f.code, f.message))
            .unwrap_or_default();
        println!(
            "    {} {}{}",
            event.created_on.format("%Y-%m-%d %H:%M:%S"),
            event.event_type().as_str(),
            failure
        );
    }
    Ok(())
}

pub async fn handle_payment_by_correlation(
    store: &dyn PaymentStore,
    correlation_id: &str,
) -> Result<(), AppError> {
    let payments = store.get_by_correlation_id(correlation_id).await?;
    if payments.is_empty() {
        return Err(AppError::NotFound(format!("payments for correlation id {correlation_id}")));
    }

    for payment in &payments {
        print_payment(payment);
    }
    Ok(())
}

fn print_payment(payment: &PaymentInstruction) {
    let incoming = payment.incoming_instruction();
    println!("{} v{} {}", payment.id(), payment.version(), payment.status());
    println!("  Business id: {}", payment.business_id());
    println!("  Provider:    {}", payment.payment_provider());
    println!(
        "  Amount:      {} {}",
        incoming.payment.amount,
        incoming.currency_code()
    );
}

pub async fn handle_rejection_report(
    provider: &dyn PaymentProviderApi,
    date: NaiveDate,
) -> Result<(), AppError> {
    let records = provider.get_rejection_report(date).await?;
    if records.is_empty() {
        println!("No rejected payments on {}", date);
        return Ok(());
    }

    println!("{:<38} {:<14} {:>14} {:<5} {}", "Payment", "Status", "Amount", "Ccy", "Reason");
    println!("{}", "-".repeat(90));
    for record in records {
        println!(
            "{:<38} {:<14} {:>14} {:<5} {}",
            record.payment_id, record.status, record.amount, record.currency, record.rejection_reason
        );
    }
    Ok(())
}

pub async fn handle_balance(provider: &dyn PaymentProviderApi, account: &str) -> Result<(), AppError> {
    let balances = provider.check_account_balance(account).await?;

    println!("{:<5} {:>20} {:>20}", "Ccy", "Begin of day", "Intraday");
    for balance in balances {
        println!(
            "{:<5} {:>20} {:>20}",
            balance.currency, balance.begin_of_day_balance, balance.intraday_amount
        );
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::in_memory::InMemoryPaymentStore;

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://payments:hunter2@db:5432/payments"),
            "postgres://payments:****@db:5432/payments"
        );
        assert_eq!(mask_password("postgres://db/payments"), "postgres://db/payments");
    }

    #[test]
    fn parses_provider_commands() {
        let cli = Cli::parse_from([
            "settlement-payments",
            "provider",
            "rejection-report",
            "--date",
            "2021-05-25",
        ]);
        let Some(Commands::Provider(ProviderCommands::RejectionReport { date })) = cli.command else {
            panic!("expected rejection-report command");
        };
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 5, 25).unwrap());
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let store = InMemoryPaymentStore::new();
        let err = handle_payment_show(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
