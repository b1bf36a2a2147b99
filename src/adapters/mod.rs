//! Port implementations.

pub mod in_memory;
pub mod postgres_payment_store;
pub mod postgres_queue;
pub mod queue_notifier;

pub use in_memory::{InMemoryFeatureFlags, InMemoryPaymentStore, InMemoryQueue};
pub use postgres_payment_store::PostgresPaymentStore;
pub use postgres_queue::PostgresQueue;
pub use queue_notifier::{QueuePublisher, QueueRequestSender, QueueStatusNotifier};
