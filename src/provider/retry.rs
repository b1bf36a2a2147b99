use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use chrono::NaiveDate;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

use super::client::ProviderError;
use super::types::{AccountBalance, PaymentRequest, PaymentResponse, ProviderStatus, RejectionRecord};
use super::{PaymentProviderApi, Submission};
use crate::services::Shutdown;

pub type RetryPredicate = Arc<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Fixed-delay retry policy. `attempts` counts the first call.
#[derive(Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Retries every error, including provider 400s.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            retryable: Arc::new(|_| true),
        }
    }

    pub fn with_predicate<F>(mut self, retryable: F) -> Self
    where
        F: Fn(&ProviderError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(retryable);
        self
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        (self.retryable)(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .finish()
    }
}

/// Wraps payment submission in the retry policy. Status checks, reports and balances
/// pass straight through.
pub struct RetryingProvider {
    inner: Arc<dyn PaymentProviderApi>,
    policy: RetryPolicy,
    shutdown: Shutdown,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn PaymentProviderApi>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            shutdown: Shutdown::new(),
        }
    }

    /// Retry delays end early on shutdown and no further attempt is made.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[async_trait]
impl PaymentProviderApi for RetryingProvider {
    async fn request_payment(&self, request: &PaymentRequest) -> Submission<PaymentResponse> {
        let attempts = self.policy.attempts.max(1) as usize;
        let backoff = ConstantBuilder::default()
            .with_delay(self.policy.delay)
            .with_max_times(attempts - 1);

        let calls = AtomicUsize::new(0);
        let correlation_ids = Mutex::new(Vec::new());
        let last_error = Mutex::new(None);
        let (inner, calls_made, ids, last) = (&self.inner, &calls, &correlation_ids, &last_error);
        let (policy, shutdown) = (&self.policy, &self.shutdown);
        let sleeper = self.shutdown.clone();

        // The loop sees only whether an attempt may be retried; the error itself is kept
        // in `last_error` so an abandoned attempt can still report it.
        let result = (|| async move {
            if calls_made.load(Ordering::SeqCst) > 0 && shutdown.is_triggered() {
                return Err(false);
            }
            calls_made.fetch_add(1, Ordering::SeqCst);
            let submission = inner.request_payment(request).await;
            if let Ok(mut ids) = ids.lock() {
                ids.extend(submission.correlation_ids);
            }
            submission.result.map_err(|e| {
                let retryable = policy.is_retryable(&e);
                if let Ok(mut last) = last.lock() {
                    *last = Some(e);
                }
                retryable
            })
        })
        .retry(backoff)
        .sleep(move |delay| {
            let shutdown = sleeper.clone();
            async move {
                shutdown.sleep(delay).await;
            }
        })
        .when(|retryable| *retryable && !shutdown.is_triggered())
        .notify(|_, delay| {
            let reason = last
                .lock()
                .ok()
                .and_then(|last| last.as_ref().map(ToString::to_string))
                .unwrap_or_default();
            warn!(
                attempts,
                debtor_reference = %request.debtor_reference,
                "Payment request failed, retrying in {:?}: {}",
                delay,
                reason
            );
        })
        .await;

        let calls = calls.into_inner();
        let correlation_ids = correlation_ids.into_inner().unwrap_or_default();
        let result = result.map_err(|_| {
            last_error
                .into_inner()
                .ok()
                .flatten()
                .unwrap_or_else(|| ProviderError::Setup("payment request was never attempted".to_string()))
        });
        let result = match result {
            Err(e) if calls < attempts && self.shutdown.is_triggered() && self.policy.is_retryable(&e) => {
                warn!(
                    attempt = calls,
                    correlation_ids = ?correlation_ids,
                    debtor_reference = %request.debtor_reference,
                    "Payment request abandoned on shutdown: {}",
                    e
                );
                Err(ProviderError::Interrupted {
                    attempts: calls,
                    source: Box::new(e),
                })
            }
            Err(e) => {
                error!(
                    attempt = calls,
                    correlation_ids = ?correlation_ids,
                    debtor_reference = %request.debtor_reference,
                    "Payment request failed: {}",
                    e
                );
                Err(e)
            }
            ok => ok,
        };

        Submission {
            correlation_ids,
            result,
        }
    }

    async fn check_payment_status(&self, payment_id: &str) -> Result<ProviderStatus, ProviderError> {
        self.inner.check_payment_status(payment_id).await
    }

    async fn get_rejection_report(&self, date: NaiveDate) -> Result<Vec<RejectionRecord>, ProviderError> {
        self.inner.get_rejection_report(date).await
    }

    async fn check_account_balance(&self, account_id: &str) -> Result<Vec<AccountBalance>, ProviderError> {
        self.inner.check_account_balance(account_id).await
    }
}
