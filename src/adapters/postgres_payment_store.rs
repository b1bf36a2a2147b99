//! Postgres implementation of PaymentStore.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::payment::PaymentSnapshot;
use crate::domain::{Event, IncomingInstruction, PaymentInstruction, PaymentProvider, PaymentStatus};
use crate::ports::{PaymentStore, StoreError, StoreResult};

/// Partial unique index from the payment_instructions migration.
const BUSINESS_ID_INDEX: &str = "idx_payment_instructions_business_id";

/// Aggregates live in `payment_instructions`, their history in `payment_events`.
/// Business-id uniqueness is enforced by a partial unique index over rows that are not
/// exempt from it.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        sequence: i32,
        event: &Event,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (payment_id, sequence, event_type, event, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(payment_id)
        .bind(sequence)
        .bind(event.event_type().as_str())
        .bind(serde_json::to_value(event)?)
        .bind(event.created_on)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn load(&self, row: PaymentRow) -> StoreResult<PaymentInstruction> {
        let events = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT event FROM payment_events WHERE payment_id = $1 ORDER BY sequence",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(event,)| serde_json::from_value::<Event>(event))
        .collect::<Result<Vec<_>, _>>()?;

        row.into_domain(events)
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn store(&self, payment: &PaymentInstruction) -> StoreResult<()> {
        let business_id = payment.business_id();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO payment_instructions (
                id, business_id, correlation_id, status, payment_provider, version,
                exempt_from_uniqueness, incoming_instruction
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id())
        .bind(&business_id)
        .bind(&payment.incoming_instruction().correlation_id)
        .bind(payment.status().as_str())
        .bind(payment.payment_provider().as_str())
        .bind(payment.version() as i32)
        .bind(payment.is_exempt_from_uniqueness())
        .bind(serde_json::to_value(payment.incoming_instruction())?)
        .execute(&mut *tx)
        .await;

        match inserted {
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(BUSINESS_ID_INDEX) => {
                return Err(StoreError::Duplicate(business_id));
            }
            other => {
                other?;
            }
        }

        for (index, event) in payment.events().iter().enumerate() {
            Self::insert_event(&mut tx, payment.id(), index as i32 + 1, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_payment(&self, id: Uuid, status: PaymentStatus, event: &Event) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, (String, i32)>(
            "SELECT status, version FROM payment_instructions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let current_status = current
            .0
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if current_status.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id));
        }

        let version = current.1 + 1;
        sqlx::query(
            r#"
            UPDATE payment_instructions
            SET status = $2, version = $3,
                exempt_from_uniqueness = exempt_from_uniqueness OR $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(version)
        .bind(status == PaymentStatus::Rejected || event.failure().is_some_and(|f| f.is_duplicate()))
        .execute(&mut *tx)
        .await?;

        Self::insert_event(&mut tx, id, version, event).await?;
        tx.commit().await?;

        tracing::debug!(payment_id = %id, status = %status, version, "Payment updated");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<PaymentInstruction> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, status, payment_provider, version, incoming_instruction
            FROM payment_instructions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.load(row).await
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Vec<PaymentInstruction>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, status, payment_provider, version, incoming_instruction
            FROM payment_instructions WHERE correlation_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut payments = Vec::with_capacity(rows.len());
        for row in rows {
            payments.push(self.load(row).await?);
        }
        Ok(payments)
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    status: String,
    payment_provider: String,
    version: i32,
    incoming_instruction: serde_json::Value,
}

impl PaymentRow {
    fn into_domain(self, events: Vec<Event>) -> StoreResult<PaymentInstruction> {
        let corrupt = |e: &dyn std::fmt::Display| StoreError::Corrupt(format!("payment {}: {e}", self.id));

        let status = self.status.parse::<PaymentStatus>().map_err(|e| corrupt(&e))?;
        let payment_provider: PaymentProvider =
            serde_json::from_value(serde_json::Value::String(self.payment_provider.clone()))
                .map_err(|e| corrupt(&e))?;
        let incoming_instruction: IncomingInstruction =
            serde_json::from_value(self.incoming_instruction.clone()).map_err(|e| corrupt(&e))?;
        let version = u32::try_from(self.version).map_err(|e| corrupt(&e))?;

        PaymentInstruction::restore(PaymentSnapshot {
            incoming_instruction,
            id: self.id,
            version,
            payment_provider,
            status,
            events,
        })
        .map_err(|e| corrupt(&e))
    }
}
