//! Banking Circle integration: HTTP client, token lifecycle and submit retries.

pub mod client;
pub mod retry;
pub mod token;
pub mod types;

use async_trait::async_trait;
use chrono::NaiveDate;

pub use client::{build_http_client, BankingCircleClient, ProviderError};
pub use retry::{RetryPolicy, RetryingProvider};
pub use token::{AccessTokenSource, StaticToken, TokenError, TokenService};
pub use types::{AccountBalance, PaymentRequest, PaymentResponse, ProviderStatus, RejectionRecord};

/// Outcome of a payment submission together with the `X-Request-ID` of every attempt
/// made, in order.
#[derive(Debug)]
pub struct Submission<T> {
    pub correlation_ids: Vec<String>,
    pub result: Result<T, ProviderError>,
}

#[async_trait]
pub trait PaymentProviderApi: Send + Sync {
    async fn request_payment(&self, request: &PaymentRequest) -> Submission<PaymentResponse>;

    async fn check_payment_status(&self, payment_id: &str) -> Result<ProviderStatus, ProviderError>;

    async fn get_rejection_report(&self, date: NaiveDate) -> Result<Vec<RejectionRecord>, ProviderError>;

    async fn check_account_balance(&self, account_id: &str) -> Result<Vec<AccountBalance>, ProviderError>;
}
