use clap::Parser;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settlement_payments::adapters::{
    PostgresPaymentStore, PostgresQueue, QueuePublisher, QueueRequestSender, QueueStatusNotifier,
};
use settlement_payments::cli::{self, Cli, Commands, DbCommands, PaymentCommands, ProviderCommands};
use settlement_payments::config::Config;
use settlement_payments::listener::{
    CircuitBreaker, DeadLetters, IncomingPaymentHandler, PaymentUpdateHandler,
    QueueListener, SubmitPaymentHandler, UncheckedPaymentHandler,
};
use settlement_payments::metrics::{Metrics, TracingMetrics};
use settlement_payments::ports::{FeatureFlags, MessageQueue};
use settlement_payments::provider::{
    build_http_client, BankingCircleClient, PaymentProviderApi, RetryPolicy, RetryingProvider,
    TokenService,
};
use settlement_payments::services::{FeatureFlagService, Shutdown, TokioScheduler};
use settlement_payments::use_cases::{CheckStatus, MakePayment, SubmitPayment, TrackOutcome};
use settlement_payments::{db, startup};

const FLAG_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const DEAD_LETTER_VISIBILITY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_db_migrate(&pool).await
        }
        Commands::Config => {
            cli::handle_config_validate(&config)?;
            let pool = db::create_pool(&config).await?;
            let report = startup::validate_environment(&config, &pool).await?;
            report.print();
            if !report.is_valid() {
                anyhow::bail!("Startup validation failed");
            }
            Ok(())
        }
        Commands::Payment(command) => {
            let pool = db::create_pool(&config).await?;
            let store = PostgresPaymentStore::new(pool);
            match command {
                PaymentCommands::Show { id } => cli::handle_payment_show(&store, id).await?,
                PaymentCommands::ByCorrelation { correlation_id } => {
                    cli::handle_payment_by_correlation(&store, &correlation_id).await?
                }
            }
            Ok(())
        }
        Commands::Provider(command) => {
            let client = banking_circle_client(&config, Arc::new(TracingMetrics))?;
            match command {
                ProviderCommands::RejectionReport { date } => {
                    cli::handle_rejection_report(&client, date).await?
                }
                ProviderCommands::Balance { account } => cli::handle_balance(&client, &account).await?,
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn banking_circle_client(config: &Config, metrics: Arc<dyn Metrics>) -> anyhow::Result<BankingCircleClient> {
    let http = build_http_client(&config.provider)?;
    let tokens = TokenService::from_config(http.clone(), &config.provider, Arc::new(TokioScheduler));
    Ok(BankingCircleClient::new(
        http,
        config.provider.base_url.clone(),
        Arc::new(tokens),
        metrics,
    ))
}

fn queue(pool: &PgPool, name: &str, visibility_timeout: Duration) -> Arc<dyn MessageQueue> {
    Arc::new(PostgresQueue::new(pool.clone(), name, visibility_timeout))
}

fn dead_letters(pool: &PgPool, name: &Option<String>) -> DeadLetters {
    DeadLetters::new(name.as_deref().map(|name| queue(pool, name, DEAD_LETTER_VISIBILITY)))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::migrate(&pool).await?;
    tracing::info!("Database migrations completed");

    let flag_service = FeatureFlagService::new(pool.clone());
    flag_service.refresh_cache().await?;
    flag_service.start(FLAG_REFRESH_INTERVAL);
    let flags: Arc<dyn FeatureFlags> = Arc::new(flag_service);

    let metrics: Arc<dyn Metrics> = Arc::new(TracingMetrics);
    let shutdown = Shutdown::new();
    let names = &config.queues;

    let incoming_queue = queue(&pool, &names.incoming, config.incoming.visibility_timeout);
    let banking_circle_queue = queue(&pool, &names.banking_circle, config.banking_circle.visibility_timeout);
    let unchecked_queue = queue(&pool, &names.unchecked, config.unchecked.visibility_timeout);
    let updates_queue = queue(&pool, &names.payment_updates, config.payment_updates.visibility_timeout);
    let islandsbanki_queue = queue(&pool, &names.islandsbanki, config.incoming.visibility_timeout);
    let acquiring_host_queue = queue(&pool, &names.acquiring_host, config.payment_updates.visibility_timeout);

    let client = Arc::new(banking_circle_client(&config, metrics.clone())?);
    let provider: Arc<dyn PaymentProviderApi> = Arc::new(
        RetryingProvider::new(
            client.clone(),
            RetryPolicy::new(config.submit_attempts, config.submit_retry_delay),
        )
        .with_shutdown(shutdown.clone()),
    );
    tracing::info!("Banking Circle client initialized with URL: {}", config.provider.base_url);

    let store = Arc::new(PostgresPaymentStore::new(pool.clone()));
    let notifier = Arc::new(QueueStatusNotifier::new(unchecked_queue.clone(), updates_queue.clone()));
    let source_accounts = Arc::new(config.source_accounts.clone());

    let make_payment = Arc::new(MakePayment::new(
        store.clone(),
        Arc::new(QueueRequestSender::new(banking_circle_queue.clone(), islandsbanki_queue)),
        metrics.clone(),
    ));
    let submit_payment = Arc::new(SubmitPayment::new(provider, notifier.clone(), source_accounts));
    let check_status = Arc::new(
        CheckStatus::new(
            client,
            notifier,
            metrics.clone(),
            config.status_check_max_iterations,
            config.status_check_delay,
        )
        .with_shutdown(shutdown.clone()),
    );
    let track_outcome = Arc::new(TrackOutcome::new(
        store,
        Arc::new(QueuePublisher::new(acquiring_host_queue)),
        flags.clone(),
        config.acquiring_host_flag.clone(),
    ));

    let listeners = vec![
        Arc::new(
            QueueListener::new(
                incoming_queue,
                Arc::new(IncomingPaymentHandler::new(make_payment)),
                flags.clone(),
                metrics.clone(),
                config.incoming.clone(),
            )
            .with_dead_letters(dead_letters(&pool, &names.incoming_dlq))
            .with_shutdown(shutdown.clone()),
        ),
        Arc::new(
            QueueListener::new(
                banking_circle_queue,
                Arc::new(SubmitPaymentHandler::new(submit_payment)),
                flags.clone(),
                metrics.clone(),
                config.banking_circle.clone(),
            )
            .with_dead_letters(dead_letters(&pool, &names.banking_circle_dlq))
            .with_shutdown(shutdown.clone())
            .with_circuit_breaker(CircuitBreaker::new(
                config.failed_payments_threshold,
                config.banking_circle.feature_flag.clone(),
            )),
        ),
        Arc::new(
            QueueListener::new(
                unchecked_queue,
                Arc::new(UncheckedPaymentHandler::new(check_status)),
                flags.clone(),
                metrics.clone(),
                config.unchecked.clone(),
            )
            .with_dead_letters(dead_letters(&pool, &names.unchecked_dlq))
            .with_shutdown(shutdown.clone()),
        ),
        Arc::new(
            QueueListener::new(
                updates_queue,
                Arc::new(PaymentUpdateHandler::new(track_outcome)),
                flags.clone(),
                metrics.clone(),
                config.payment_updates.clone(),
            )
            .with_dead_letters(dead_letters(&pool, &names.payment_updates_dlq))
            .with_shutdown(shutdown.clone()),
        ),
    ];

    let handles: Vec<_> = listeners
        .iter()
        .map(|listener| tokio::spawn(listener.clone().run()))
        .collect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping listeners");

    shutdown.trigger();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Listener task failed: {}", e);
        }
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
