//! In-process adapters for tests and local runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::domain::payment::PaymentSnapshot;
use crate::domain::{Event, PaymentInstruction, PaymentStatus};
use crate::ports::{
    FeatureFlags, FlagError, MessageQueue, PaymentStore, QueueError, QueueMessage, StoreError,
    StoreResult,
};

#[derive(Debug, Clone)]
struct StoredPayment {
    snapshot: PaymentSnapshot,
    business_id: String,
    exempt: bool,
}

impl StoredPayment {
    fn restore(&self) -> StoreResult<PaymentInstruction> {
        PaymentInstruction::restore(self.snapshot.clone())
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

/// Same contract as the Postgres store, including partial business-id uniqueness.
#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    payments: RwLock<HashMap<Uuid, StoredPayment>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<PaymentInstruction> {
        self.payments
            .read()
            .await
            .values()
            .filter_map(|stored| stored.restore().ok())
            .collect()
    }
}

fn snapshot_of(payment: &PaymentInstruction) -> PaymentSnapshot {
    PaymentSnapshot {
        incoming_instruction: payment.incoming_instruction().clone(),
        id: payment.id(),
        version: payment.version(),
        payment_provider: payment.payment_provider(),
        status: payment.status(),
        events: payment.events().to_vec(),
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn store(&self, payment: &PaymentInstruction) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        let exempt = payment.is_exempt_from_uniqueness();
        let business_id = payment.business_id();

        if !exempt
            && payments
                .values()
                .any(|stored| !stored.exempt && stored.business_id == business_id)
        {
            return Err(StoreError::Duplicate(business_id));
        }

        payments.insert(
            payment.id(),
            StoredPayment {
                snapshot: snapshot_of(payment),
                business_id,
                exempt,
            },
        );
        Ok(())
    }

    async fn update_payment(&self, id: Uuid, status: PaymentStatus, event: &Event) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if stored.snapshot.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id));
        }

        stored.snapshot.status = status;
        stored.snapshot.events.push(event.clone());
        stored.snapshot.version += 1;
        stored.exempt = stored.exempt
            || status == PaymentStatus::Rejected
            || event.failure().is_some_and(|f| f.is_duplicate());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<PaymentInstruction> {
        self.payments
            .read()
            .await
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .restore()
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Vec<PaymentInstruction>> {
        self.payments
            .read()
            .await
            .values()
            .filter(|stored| stored.snapshot.incoming_instruction.correlation_id == correlation_id)
            .map(StoredPayment::restore)
            .collect()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
    sent: Vec<String>,
    deleted: Vec<String>,
}

/// FIFO queue with receipt handles. Received messages stay in flight until deleted;
/// visibility timeouts are not simulated.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    arrived: Notify,
    failing_deletes: AtomicU32,
    failing_deletes_retryable: AtomicBool,
    failing_sends: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            arrived: Notify::new(),
            failing_deletes: AtomicU32::new(0),
            failing_deletes_retryable: AtomicBool::new(true),
            failing_sends: AtomicBool::new(false),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut QueueState) -> T) -> Result<T, QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Permanent {
            queue: self.name.clone(),
            message: "queue state poisoned".to_string(),
        })?;
        Ok(f(&mut state))
    }

    /// Every body ever sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.with_state(|state| state.sent.clone()).unwrap_or_default()
    }

    /// Bodies waiting to be received.
    pub fn pending(&self) -> Vec<String> {
        self.with_state(|state| state.pending.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.with_state(|state| state.in_flight.len()).unwrap_or(0)
    }

    /// Receipt handles of deleted messages.
    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|state| state.deleted.clone()).unwrap_or_default()
    }

    /// Makes the next `count` deletes fail.
    pub fn fail_deletes(&self, count: u32, retryable: bool) {
        self.failing_deletes.store(count, Ordering::SeqCst);
        self.failing_deletes_retryable.store(retryable, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing_sends.store(failing, Ordering::SeqCst);
    }

    fn failure(&self, retryable: bool, message: &str) -> QueueError {
        let queue = self.name.clone();
        let message = message.to_string();
        if retryable {
            QueueError::Transient { queue, message }
        } else {
            QueueError::Permanent { queue, message }
        }
    }

    fn take(&self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        self.with_state(|state| {
            let mut batch = Vec::new();
            while batch.len() < max_messages.max(1) {
                let Some(message) = state.pending.pop_front() else {
                    break;
                };
                let received = QueueMessage {
                    receipt_handle: Uuid::new_v4().to_string(),
                    ..message
                };
                state
                    .in_flight
                    .insert(received.receipt_handle.clone(), received.clone());
                batch.push(received);
            }
            batch
        })
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let batch = self.take(max_messages)?;
        if !batch.is_empty() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(wait, self.arrived.notified()).await;
        self.take(max_messages)
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(self.failure(true, "send failed"));
        }

        self.with_state(|state| {
            state.sent.push(body.to_string());
            state.pending.push_back(QueueMessage {
                id: Uuid::new_v4().to_string(),
                receipt_handle: String::new(),
                body: body.to_string(),
            });
        })?;
        self.arrived.notify_one();
        Ok(())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let remaining = self.failing_deletes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_deletes.store(remaining - 1, Ordering::SeqCst);
            let retryable = self.failing_deletes_retryable.load(Ordering::SeqCst);
            return Err(self.failure(retryable, "delete failed"));
        }

        let removed = self.with_state(|state| {
            let removed = state.in_flight.remove(receipt_handle).is_some();
            if removed {
                state.deleted.push(receipt_handle.to_string());
            }
            removed
        })?;

        if removed {
            Ok(())
        } else {
            Err(self.failure(false, "unknown receipt handle"))
        }
    }
}

/// Flags default to enabled until set.
#[derive(Debug)]
pub struct InMemoryFeatureFlags {
    flags: RwLock<HashMap<String, bool>>,
    disabled: Mutex<HashSet<String>>,
    default_enabled: bool,
}

impl Default for InMemoryFeatureFlags {
    fn default() -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
            disabled: Mutex::new(HashSet::new()),
            default_enabled: true,
        }
    }
}

impl InMemoryFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, flag: &str, enabled: bool) {
        self.flags.write().await.insert(flag.to_string(), enabled);
    }

    /// Flags switched off through [`FeatureFlags::disable`].
    pub fn disabled_by_circuit(&self) -> Vec<String> {
        self.disabled
            .lock()
            .map(|disabled| disabled.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FeatureFlags for InMemoryFeatureFlags {
    async fn is_enabled(&self, flag: &str) -> bool {
        self.flags
            .read()
            .await
            .get(flag)
            .copied()
            .unwrap_or(self.default_enabled)
    }

    async fn disable(&self, flag: &str) -> Result<(), FlagError> {
        self.set(flag, false).await;
        if let Ok(mut disabled) = self.disabled.lock() {
            disabled.insert(flag.to_string());
        }
        Ok(())
    }
}
