use chrono::NaiveDate;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use settlement_payments::adapters::{PostgresPaymentStore, PostgresQueue};
use settlement_payments::domain::{
    DomainFailure, EventType, IncomingInstruction, PaymentInstruction, PaymentStatus,
};
use settlement_payments::ports::{MessageQueue, PaymentStore, QueueError, StoreError};

async fn setup_db() -> Option<PgPool> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            println!("Skipping Postgres test: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test DB");
    settlement_payments::db::migrate(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

/// Each test gets its own contract number so reruns against one database don't collide.
fn submitted_payment(correlation_id: &str) -> PaymentInstruction {
    let mut incoming = IncomingInstruction::default();
    incoming.correlation_id = correlation_id.to_string();
    incoming.merchant.contract_number = (Uuid::new_v4().as_u128() % 10_000_000).to_string();
    incoming.merchant.name = "Catarina & Riya".to_string();
    incoming.merchant.account.account_number = "GB33BUKB20201555555555".to_string();
    incoming.metadata.source = "Solanteq".to_string();
    incoming.payment.amount = "1234.56".to_string();
    incoming.payment.currency.iso_code = "EUR".to_string();
    incoming.payment.currency.iso_number = "978".to_string();
    incoming.payment.execution_date = NaiveDate::from_ymd_opt(2021, 5, 25);

    let mut payment = PaymentInstruction::create(incoming);
    payment.apply_currency_rules().unwrap();
    payment.route_to_payment_provider().unwrap();
    payment.submit_for_processing().unwrap();
    payment
}

#[tokio::test]
async fn test_store_and_reload_payment() {
    let Some(pool) = setup_db().await else { return };
    let store = PostgresPaymentStore::new(pool);

    let correlation_id = Uuid::new_v4().to_string();
    let payment = submitted_payment(&correlation_id);
    store.store(&payment).await.expect("store payment");

    let loaded = store.get(payment.id()).await.expect("load payment");
    assert_eq!(loaded.status(), PaymentStatus::SubmittedForProcessing);
    assert_eq!(loaded.version(), payment.version());
    assert_eq!(loaded.events().len(), payment.events().len());
    assert_eq!(loaded.business_id(), payment.business_id());
    assert_eq!(loaded.incoming_instruction(), payment.incoming_instruction());

    let by_correlation = store.get_by_correlation_id(&correlation_id).await.unwrap();
    assert_eq!(by_correlation.len(), 1);
    assert_eq!(by_correlation[0].id(), payment.id());
}

#[tokio::test]
async fn test_duplicate_business_id_is_refused() {
    let Some(pool) = setup_db().await else { return };
    let store = PostgresPaymentStore::new(pool);

    let payment = submitted_payment("duplicate-test");
    store.store(&payment).await.unwrap();

    let mut again = PaymentInstruction::create(payment.incoming_instruction().clone());
    again.apply_currency_rules().unwrap();
    again.route_to_payment_provider().unwrap();
    again.submit_for_processing().unwrap();

    match store.store(&again).await {
        Err(StoreError::Duplicate(business_id)) => assert_eq!(business_id, payment.business_id()),
        other => panic!("expected duplicate error, got {other:?}"),
    }

    // The failed record for a re-delivery is exempt and stores fine.
    again.fail(DomainFailure::duplicate(), None).unwrap();
    store.store(&again).await.expect("exempt duplicate record");
}

#[tokio::test]
async fn test_repeated_payment_id_is_not_a_duplicate() {
    let Some(pool) = setup_db().await else { return };
    let store = PostgresPaymentStore::new(pool);

    let mut payment = submitted_payment("repeated-id-test");
    payment.fail(DomainFailure::duplicate(), None).unwrap();
    store.store(&payment).await.unwrap();

    // The primary key collides, not the business id index, so this is a storage error.
    match store.store(&payment).await {
        Err(StoreError::Database(_)) => {}
        other => panic!("expected database error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_payment_appends_event_and_refuses_after_terminal() {
    let Some(pool) = setup_db().await else { return };
    let store = PostgresPaymentStore::new(pool);

    let mut payment = submitted_payment("update-test");
    store.store(&payment).await.unwrap();

    payment.succeed("bc-42", "Settlm 9876862 20210525").unwrap();
    let event = payment.last_event().unwrap().clone();
    store
        .update_payment(payment.id(), payment.status(), &event)
        .await
        .expect("update payment");

    let loaded = store.get(payment.id()).await.unwrap();
    assert_eq!(loaded.status(), PaymentStatus::Successful);
    assert_eq!(loaded.version(), payment.version());
    assert_eq!(loaded.last_event().unwrap().event_type(), EventType::ProcessingSucceeded);

    let again = store.update_payment(payment.id(), payment.status(), &event).await;
    assert!(matches!(again, Err(StoreError::AlreadyTerminal(id)) if id == payment.id()));
}

#[tokio::test]
async fn test_unknown_payment_is_not_found() {
    let Some(pool) = setup_db().await else { return };
    let store = PostgresPaymentStore::new(pool);

    assert!(matches!(store.get(Uuid::new_v4()).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_queue_claims_and_deletes_messages() {
    let Some(pool) = setup_db().await else { return };
    let name = format!("test-queue-{}", Uuid::new_v4());
    let queue = PostgresQueue::new(pool.clone(), &name, Duration::from_secs(60));

    queue.send(r#"{"n":1}"#).await.unwrap();
    queue.send(r#"{"n":2}"#).await.unwrap();

    let first = queue.receive(1, Duration::ZERO).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].body, r#"{"n":1}"#);

    // The claimed message stays invisible to other receivers.
    let second = queue.receive(10, Duration::ZERO).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].body, r#"{"n":2}"#);
    assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

    queue.delete(&first[0].receipt_handle).await.unwrap();
    queue.delete(&second[0].receipt_handle).await.unwrap();

    let stale = queue.delete(&first[0].receipt_handle).await;
    assert!(matches!(stale, Err(QueueError::Permanent { .. })));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = $1")
        .bind(&name)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_expired_visibility_redelivers_message() {
    let Some(pool) = setup_db().await else { return };
    let name = format!("test-queue-{}", Uuid::new_v4());
    let queue = PostgresQueue::new(pool, &name, Duration::ZERO);

    queue.send("redelivered").await.unwrap();
    let first = queue.receive(1, Duration::ZERO).await.unwrap();
    let second = queue.receive(1, Duration::from_secs(2)).await.unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, first[0].id);
    assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
}
