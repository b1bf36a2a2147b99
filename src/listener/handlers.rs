//! Message handlers binding queue bodies to use cases.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{HandlerError, MessageHandler};
use crate::domain::{IncomingInstruction, PaymentInstruction, ProviderEvent};
use crate::use_cases::{CheckStatus, MakePayment, StatusCheck, SubmitPayment, TrackOutcome};

/// Incoming payment requests.
pub struct IncomingPaymentHandler {
    use_case: Arc<MakePayment>,
}

impl IncomingPaymentHandler {
    pub fn new(use_case: Arc<MakePayment>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl MessageHandler for IncomingPaymentHandler {
    async fn handle(&self, body: &str) -> Result<(), HandlerError> {
        let incoming: IncomingInstruction = serde_json::from_str(body)?;
        let payment_id = self.use_case.execute(incoming).await.map_err(HandlerError::failed)?;
        debug!(%payment_id, "Incoming payment request handled");
        Ok(())
    }
}

/// Routed Banking Circle instructions awaiting submission.
pub struct SubmitPaymentHandler {
    use_case: Arc<SubmitPayment>,
}

impl SubmitPaymentHandler {
    pub fn new(use_case: Arc<SubmitPayment>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl MessageHandler for SubmitPaymentHandler {
    async fn handle(&self, body: &str) -> Result<(), HandlerError> {
        let payment: PaymentInstruction = serde_json::from_str(body)?;
        self.use_case.execute(payment).await.map_err(HandlerError::failed)?;
        Ok(())
    }
}

/// SUBMITTED provider events awaiting a terminal status.
pub struct UncheckedPaymentHandler {
    use_case: Arc<CheckStatus>,
}

impl UncheckedPaymentHandler {
    pub fn new(use_case: Arc<CheckStatus>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl MessageHandler for UncheckedPaymentHandler {
    async fn handle(&self, body: &str) -> Result<(), HandlerError> {
        let event: ProviderEvent = serde_json::from_str(body)?;
        let check = StatusCheck::try_from(event).map_err(HandlerError::failed)?;
        self.use_case.execute(check).await.map_err(HandlerError::failed)?;
        Ok(())
    }
}

/// Terminal provider events.
pub struct PaymentUpdateHandler {
    use_case: Arc<TrackOutcome>,
}

impl PaymentUpdateHandler {
    pub fn new(use_case: Arc<TrackOutcome>) -> Self {
        Self { use_case }
    }
}

#[async_trait]
impl MessageHandler for PaymentUpdateHandler {
    async fn handle(&self, body: &str) -> Result<(), HandlerError> {
        let event: ProviderEvent = serde_json::from_str(body)?;
        self.use_case.execute(event).await.map_err(HandlerError::failed)?;
        Ok(())
    }
}
