//! Track-outcome use case.
//! Applies a terminal provider event to the stored aggregate and optionally forwards it
//! to the acquiring host.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{PaymentStatus, ProviderEvent, ProviderEventError, TransitionError};
use crate::ports::{FeatureFlags, NotifierError, PaymentStatusNotifier, PaymentStore, StoreError};

#[derive(Debug, Error)]
pub enum TrackOutcomeError {
    #[error(transparent)]
    Event(#[from] ProviderEventError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to forward outcome to the acquiring host: {0}")]
    Notifier(#[from] NotifierError),
}

pub struct TrackOutcome {
    store: Arc<dyn PaymentStore>,
    acquiring_host: Arc<dyn PaymentStatusNotifier>,
    flags: Arc<dyn FeatureFlags>,
    acquiring_host_flag: String,
}

impl TrackOutcome {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        acquiring_host: Arc<dyn PaymentStatusNotifier>,
        flags: Arc<dyn FeatureFlags>,
        acquiring_host_flag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            acquiring_host,
            flags,
            acquiring_host_flag: acquiring_host_flag.into(),
        }
    }

    /// Returns the status the payment ended in. A payment that is already terminal is left
    /// untouched, so redelivered events are harmless.
    pub async fn execute(&self, event: ProviderEvent) -> Result<PaymentStatus, TrackOutcomeError> {
        event.validate()?;

        let mut payment = event.instruction.clone();
        payment.track_provider_event(&event)?;

        let last_event = payment
            .last_event()
            .ok_or_else(|| TransitionError::InconsistentSnapshot("no event after tracking".to_string()))?;

        match self
            .store
            .update_payment(payment.id(), payment.status(), last_event)
            .await
        {
            Ok(()) => {}
            Err(StoreError::AlreadyTerminal(id)) => {
                warn!(payment_id = %id, dedup_key = %event.dedup_key(), "Payment already terminal, ignoring event");
                return self.store.get(id).await.map(|p| p.status()).map_err(Into::into);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            payment_id = %payment.id(),
            status = %payment.status(),
            provider_payment_id = %event.provider_payment_id,
            "Payment outcome tracked"
        );

        if self.flags.is_enabled(&self.acquiring_host_flag).await {
            self.acquiring_host.send_payment_status(&event).await?;
            debug!(payment_id = %payment.id(), "Outcome forwarded to the acquiring host");
        }

        Ok(payment.status())
    }
}
