use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Identity, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::token::{AccessTokenSource, TokenError};
use super::types::{
    AccountBalance, CreatedPayment, PaymentRequest, PaymentResponse, ProviderStatus,
    RejectionRecord, StatusResponse,
};
use super::{PaymentProviderApi, Submission};
use crate::config::ProviderConfig;
use crate::metrics::{HttpCallMetric, Metrics};
use crate::utils::sanitize::sanitize_body;

pub const X_REQUEST_ID: &str = "X-Request-ID";

const OP_REQUEST_PAYMENT: &str = "request_payment";
const OP_CHECK_STATUS: &str = "check_payment_status";
const OP_REJECTION_REPORT: &str = "get_rejection_report";
const OP_ACCOUNT_BALANCE: &str = "check_account_balance";

/// How long an idle keep-alive connection stays in the client pool.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("unauthorized call to {url} (correlation id {correlation_id}): {body}")]
    Unauthorized {
        url: String,
        body: String,
        correlation_id: String,
    },

    #[error("payment request rejected as invalid (correlation id {correlation_id}): {body}")]
    InvalidPaymentRequest {
        request: String,
        body: String,
        correlation_id: String,
    },

    #[error("provider payment {payment_id} not found (correlation id {correlation_id})")]
    PaymentNotFound {
        payment_id: String,
        correlation_id: String,
    },

    #[error("unrecognised response to {action}: HTTP {status} (correlation id {correlation_id}): {body}")]
    UnrecognisedProviderError {
        action: &'static str,
        status: u16,
        body: String,
        correlation_id: String,
    },

    #[error("transport failure during {action} (correlation id {correlation_id}): {source}")]
    Transport {
        action: &'static str,
        correlation_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response body for {action} (correlation id {correlation_id}): {source}")]
    InvalidResponse {
        action: &'static str,
        correlation_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("failed to set up provider client: {0}")]
    Setup(String),

    /// Shutdown stopped a retry sequence that still had attempts left.
    #[error("stopped after {attempts} attempts on shutdown: {source}")]
    Interrupted {
        attempts: usize,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            ProviderError::Unauthorized { correlation_id, .. }
            | ProviderError::InvalidPaymentRequest { correlation_id, .. }
            | ProviderError::PaymentNotFound { correlation_id, .. }
            | ProviderError::UnrecognisedProviderError { correlation_id, .. }
            | ProviderError::Transport { correlation_id, .. }
            | ProviderError::InvalidResponse { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ProviderError::Interrupted { .. })
    }

    /// No HTTP response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Transport { .. })
    }
}

/// Builds the shared HTTP client, with the client certificate when one is configured.
pub fn build_http_client(config: &ProviderConfig) -> Result<Client, ProviderError> {
    let mut builder = Client::builder()
        .timeout(config.api_timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT);

    if let (Some(cert_path), Some(key_path)) = (&config.client_cert_path, &config.client_key_path) {
        let cert = std::fs::read(cert_path)
            .map_err(|e| ProviderError::Setup(format!("reading {cert_path}: {e}")))?;
        let key = std::fs::read(key_path)
            .map_err(|e| ProviderError::Setup(format!("reading {key_path}: {e}")))?;
        let identity = Identity::from_pkcs8_pem(&cert, &key)
            .map_err(|e| ProviderError::Setup(format!("invalid client certificate: {e}")))?;
        builder = builder.identity(identity);
    }

    builder
        .build()
        .map_err(|e| ProviderError::Setup(e.to_string()))
}

/// Estimates keep-alive reuse, which reqwest does not report. Every completed response
/// hands a connection back to the pool; a call that starts while one of those is still
/// within [`POOL_IDLE_TIMEOUT`] counts as reusing it.
#[derive(Debug, Default)]
struct ConnectionTracker {
    idle_since: Mutex<Vec<Instant>>,
}

impl ConnectionTracker {
    fn checkout(&self) -> bool {
        let Ok(mut idle) = self.idle_since.lock() else {
            return false;
        };
        idle.retain(|since| since.elapsed() < POOL_IDLE_TIMEOUT);
        idle.pop().is_some()
    }

    fn release(&self) {
        if let Ok(mut idle) = self.idle_since.lock() {
            idle.push(Instant::now());
        }
    }
}

/// HTTP client for the Banking Circle API.
#[derive(Clone)]
pub struct BankingCircleClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    metrics: Arc<dyn Metrics>,
    connections: Arc<ConnectionTracker>,
}

impl BankingCircleClient {
    pub fn new(
        client: Client,
        base_url: String,
        tokens: Arc<dyn AccessTokenSource>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        BankingCircleClient {
            client,
            base_url,
            tokens,
            metrics,
            connections: Arc::new(ConnectionTracker::default()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Sends with the common headers and returns status and raw body. Every call is
    /// measured, including those that never get a response.
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        correlation_id: &str,
    ) -> Result<(StatusCode, String), ProviderError> {
        let token = self.tokens.access_token().await?;
        let reused = self.connections.checkout();
        let started = Instant::now();

        let result = request
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(X_REQUEST_ID, correlation_id)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(source) => {
                self.record(operation, started, 0, reused);
                warn!(operation, correlation_id, "Provider call failed: {}", source);
                return Err(ProviderError::Transport {
                    action: operation,
                    correlation_id: correlation_id.to_string(),
                    source,
                });
            }
        };

        let status = response.status();
        self.record(operation, started, status.as_u16() / 100, reused);

        let body = response.text().await.map_err(|source| ProviderError::Transport {
            action: operation,
            correlation_id: correlation_id.to_string(),
            source,
        })?;
        self.connections.release();

        debug!(
            operation,
            correlation_id,
            status = status.as_u16(),
            body = %sanitize_body(&body),
            "Provider responded"
        );

        Ok((status, body))
    }

    fn record(&self, operation: &'static str, started: Instant, status_class: u16, connection_reused: bool) {
        self.metrics.record_http_call(&HttpCallMetric {
            operation,
            latency: started.elapsed(),
            status_class,
            connection_reused,
        });
    }

    fn unrecognised(
        action: &'static str,
        status: StatusCode,
        body: String,
        correlation_id: &str,
    ) -> ProviderError {
        ProviderError::UnrecognisedProviderError {
            action,
            status: status.as_u16(),
            body,
            correlation_id: correlation_id.to_string(),
        }
    }

    async fn request_payment_once(
        &self,
        request: &PaymentRequest,
        correlation_id: &str,
    ) -> Result<PaymentResponse, ProviderError> {
        let url = self.url("/payments/singles");
        let payload = serde_json::to_string(request)?;
        let (status, body) = self
            .send(
                OP_REQUEST_PAYMENT,
                self.client.post(&url).body(payload.clone()),
                correlation_id,
            )
            .await?;

        match status {
            StatusCode::CREATED => {
                let created: CreatedPayment = parse(OP_REQUEST_PAYMENT, &body, correlation_id)?;
                Ok(PaymentResponse {
                    provider_payment_id: created.payment_id,
                    status: created.status,
                    banking_reference: request.debtor_reference.clone(),
                })
            }
            StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized {
                url,
                body,
                correlation_id: correlation_id.to_string(),
            }),
            StatusCode::BAD_REQUEST => Err(ProviderError::InvalidPaymentRequest {
                request: sanitize_body(&payload),
                body,
                correlation_id: correlation_id.to_string(),
            }),
            other => Err(Self::unrecognised(OP_REQUEST_PAYMENT, other, body, correlation_id)),
        }
    }
}

fn parse<T: DeserializeOwned>(
    action: &'static str,
    body: &str,
    correlation_id: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|source| ProviderError::InvalidResponse {
        action,
        correlation_id: correlation_id.to_string(),
        source,
    })
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl PaymentProviderApi for BankingCircleClient {
    async fn request_payment(&self, request: &PaymentRequest) -> Submission<PaymentResponse> {
        let correlation_id = new_correlation_id();
        let result = self.request_payment_once(request, &correlation_id).await;
        Submission {
            correlation_ids: vec![correlation_id],
            result,
        }
    }

    async fn check_payment_status(&self, payment_id: &str) -> Result<ProviderStatus, ProviderError> {
        let correlation_id = new_correlation_id();
        let url = self.url(&format!("/payments/singles/{payment_id}/status"));
        let (status, body) = self
            .send(OP_CHECK_STATUS, self.client.get(&url), &correlation_id)
            .await?;

        match status {
            StatusCode::OK => {
                let response: StatusResponse = parse(OP_CHECK_STATUS, &body, &correlation_id)?;
                Ok(response.status)
            }
            StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized {
                url,
                body,
                correlation_id,
            }),
            StatusCode::NOT_FOUND => Err(ProviderError::PaymentNotFound {
                payment_id: payment_id.to_string(),
                correlation_id,
            }),
            other => Err(Self::unrecognised(OP_CHECK_STATUS, other, body, &correlation_id)),
        }
    }

    async fn get_rejection_report(&self, date: NaiveDate) -> Result<Vec<RejectionRecord>, ProviderError> {
        let correlation_id = new_correlation_id();
        let url = self.url("/reports/rejection-report");
        let request = self
            .client
            .get(&url)
            .query(&[
                ("TransactionDate", date.format("%Y-%m-%d").to_string()),
                ("IncludeReceived", "false".to_string()),
                ("IncludeMissingFunds", "false".to_string()),
            ]);
        let (status, body) = self.send(OP_REJECTION_REPORT, request, &correlation_id).await?;

        match status {
            StatusCode::OK => parse(OP_REJECTION_REPORT, &body, &correlation_id),
            StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized {
                url,
                body,
                correlation_id,
            }),
            other => Err(Self::unrecognised(OP_REJECTION_REPORT, other, body, &correlation_id)),
        }
    }

    async fn check_account_balance(&self, account_id: &str) -> Result<Vec<AccountBalance>, ProviderError> {
        let correlation_id = new_correlation_id();
        let url = self.url(&format!("/accounts/{account_id}/balances"));
        let (status, body) = self
            .send(OP_ACCOUNT_BALANCE, self.client.get(&url), &correlation_id)
            .await?;

        match status {
            StatusCode::OK => parse(OP_ACCOUNT_BALANCE, &body, &correlation_id),
            StatusCode::UNAUTHORIZED => Err(ProviderError::Unauthorized {
                url,
                body,
                correlation_id,
            }),
            other => Err(Self::unrecognised(OP_ACCOUNT_BALANCE, other, body, &correlation_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetrics;
    use crate::provider::token::StaticToken;
    use mockito::Matcher;

    const UUID_PATTERN: &str = r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

    fn client(url: String, metrics: Arc<RecordingMetrics>) -> BankingCircleClient {
        BankingCircleClient::new(
            Client::new(),
            url,
            Arc::new(StaticToken("test-token".to_string())),
            metrics,
        )
    }

    #[tokio::test]
    async fn status_check_sends_common_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/payments/singles/bc-1/status")
            .match_header("authorization", "Bearer test-token")
            .match_header("content-type", "application/json")
            .match_header("x-request-id", Matcher::Regex(UUID_PATTERN.to_string()))
            .with_status(200)
            .with_body(r#"{"status": "PendingProcessing"}"#)
            .create_async()
            .await;

        let metrics = Arc::new(RecordingMetrics::new());
        let api = client(server.url(), metrics.clone());
        let status = api.check_payment_status("bc-1").await.unwrap();

        assert_eq!(status, ProviderStatus::PendingProcessing);
        mock.assert_async().await;

        let calls = metrics.http_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, OP_CHECK_STATUS);
        assert_eq!(calls[0].status_class, 2);
        assert!(!calls[0].connection_reused);
    }

    #[tokio::test]
    async fn later_calls_count_as_reusing_the_connection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments/singles/bc-1/status")
            .with_status(200)
            .with_body(r#"{"status": "Processed"}"#)
            .create_async()
            .await;

        let metrics = Arc::new(RecordingMetrics::new());
        let api = client(server.url(), metrics.clone());
        api.check_payment_status("bc-1").await.unwrap();
        api.check_payment_status("bc-1").await.unwrap();

        let reused: Vec<bool> = metrics.http_calls().iter().map(|c| c.connection_reused).collect();
        assert_eq!(reused, vec![false, true]);
    }

    #[tokio::test]
    async fn status_check_maps_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments/singles/missing/status")
            .with_status(404)
            .create_async()
            .await;

        let api = client(server.url(), Arc::new(RecordingMetrics::new()));
        let err = api.check_payment_status("missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::PaymentNotFound { .. }));
        assert!(err.correlation_id().is_some());
    }

    #[tokio::test]
    async fn transport_failure_is_measured_without_status() {
        let metrics = Arc::new(RecordingMetrics::new());
        // Nothing listens on port 9 of localhost.
        let api = client("http://127.0.0.1:9".to_string(), metrics.clone());
        let err = api.check_payment_status("bc-1").await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(metrics.http_calls()[0].status_class, 0);
        assert!(!metrics.http_calls()[0].connection_reused);
    }
}
