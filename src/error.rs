use thiserror::Error;

use crate::domain::TransitionError;
use crate::ports::{FlagError, NotifierError, QueueError, StoreError};
use crate::provider::{ProviderError, TokenError};
use crate::use_cases::{CheckStatusError, MakePaymentError, SubmitPaymentError, TrackOutcomeError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Feature flag error: {0}")]
    Flag(#[from] FlagError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    MakePayment(#[from] MakePaymentError),

    #[error(transparent)]
    SubmitPayment(#[from] SubmitPaymentError),

    #[error(transparent)]
    CheckStatus(#[from] CheckStatusError),

    #[error(transparent)]
    TrackOutcome(#[from] TrackOutcomeError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Stable label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Migration(_) | AppError::Store(_) => "storage",
            AppError::Queue(_) | AppError::Notifier(_) => "queue",
            AppError::Flag(_) => "feature_flag",
            _ if self.is_interrupted() => "interrupted",
            AppError::Token(_) | AppError::Provider(_) => "provider",
            AppError::Transition(_) => "domain",
            AppError::MakePayment(MakePaymentError::Validation { .. }) => "validation",
            AppError::MakePayment(MakePaymentError::Duplicate { .. }) => "duplicate",
            AppError::MakePayment(_)
            | AppError::SubmitPayment(_)
            | AppError::CheckStatus(_)
            | AppError::TrackOutcome(_) => "use_case",
            AppError::NotFound(_) => "not_found",
            AppError::Config(_) => "config",
        }
    }

    /// Shutdown stopped the operation before it could finish.
    pub fn is_interrupted(&self) -> bool {
        match self {
            AppError::Provider(e) => e.is_interrupted(),
            AppError::SubmitPayment(SubmitPaymentError::Interrupted { .. })
            | AppError::CheckStatus(CheckStatusError::Interrupted(_)) => true,
            _ => false,
        }
    }

    /// Whether repeating the failed operation could succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        if self.is_interrupted() {
            return true;
        }
        match self {
            AppError::Database(e) => is_transient_sqlx(e),
            AppError::Store(StoreError::Database(e)) => is_transient_sqlx(e),
            AppError::Queue(e) | AppError::Notifier(NotifierError::Queue(e)) => e.is_retryable(),
            AppError::Token(TokenError::Request(_)) => true,
            AppError::Provider(e) => e.is_transport(),
            AppError::SubmitPayment(SubmitPaymentError::Provider { source, .. }) => source.is_transport(),
            AppError::CheckStatus(CheckStatusError::Transport { .. }) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}
