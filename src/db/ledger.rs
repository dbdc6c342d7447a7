use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::models::{CreditTransactionRow, OrganizationRow};
use crate::domain::{
    CreditTransaction, LedgerCredit, Organization, PaymentVerification, TransactionMetadata,
    TransactionType,
};
use crate::ports::{CreditLedger, RepositoryError};

const TRANSACTION_COLUMNS: &str = "id, organization_id, user_id, amount, type, description, \
     balance_after, payment_intent_id, transaction_hash, metadata, created_at";

/// Credit ledger over the `organizations` and `credit_transactions` tables.
///
/// Balance changes lock the organization row with `SELECT ... FOR UPDATE`, so
/// writers for one organization queue up while other organizations proceed.
#[derive(Clone)]
pub struct PgCreditLedger {
    pool: PgPool,
}

impl PgCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_organization(&self, org: &Organization) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO organizations (
                id, name, credit_balance, auto_top_up_enabled, credit_threshold,
                auto_top_up_amount, payment_customer_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.credit_balance)
        .bind(org.auto_top_up_enabled)
        .bind(&org.credit_threshold)
        .bind(&org.auto_top_up_amount)
        .bind(&org.payment_customer_id)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn insert_entry<'e, E>(executor: E, entry: &CreditTransaction) -> Result<(), RepositoryError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO credit_transactions (
            id, organization_id, user_id, amount, type, description,
            balance_after, payment_intent_id, transaction_hash, metadata, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.id)
    .bind(entry.organization_id)
    .bind(entry.user_id)
    .bind(&entry.amount)
    .bind(entry.transaction_type.as_str())
    .bind(&entry.description)
    .bind(&entry.balance_after)
    .bind(&entry.payment_intent_id)
    .bind(&entry.transaction_hash)
    .bind(Json(&entry.metadata))
    .bind(entry.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

/// Locks the organization row and adds `amount` to its balance.
async fn lock_and_credit(
    conn: &mut PgConnection,
    organization_id: Uuid,
    amount: &BigDecimal,
) -> Result<BigDecimal, RepositoryError> {
    let balance: Option<BigDecimal> = sqlx::query_scalar(
        "SELECT credit_balance FROM organizations WHERE id = $1 FOR UPDATE",
    )
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await?;

    let balance = balance
        .ok_or_else(|| RepositoryError::NotFound(format!("organization {}", organization_id)))?;
    let new_balance = &balance + amount;
    if new_balance < BigDecimal::from(0) {
        return Err(RepositoryError::InvariantViolation(format!(
            "balance of organization {} would become {}",
            organization_id, new_balance
        )));
    }

    sqlx::query("UPDATE organizations SET credit_balance = $2, updated_at = NOW() WHERE id = $1")
        .bind(organization_id)
        .bind(&new_balance)
        .execute(&mut *conn)
        .await?;

    Ok(new_balance)
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, RepositoryError> {
        let row = sqlx::query_as::<_, OrganizationRow>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Organization::from))
    }

    async fn list_auto_top_up_organizations(&self) -> Result<Vec<Organization>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            "SELECT * FROM organizations WHERE auto_top_up_enabled ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Organization::from).collect())
    }

    async fn apply_credit(
        &self,
        organization_id: Uuid,
        credit: LedgerCredit,
    ) -> Result<CreditTransaction, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let new_balance = lock_and_credit(&mut *tx, organization_id, &credit.amount).await?;
        let entry = credit.into_transaction(organization_id, new_balance, Utc::now());
        insert_entry(&mut *tx, &entry).await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn insert_transaction(&self, entry: &CreditTransaction) -> Result<(), RepositoryError> {
        insert_entry(&self.pool, entry).await
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<CreditTransaction>, RepositoryError> {
        let row = sqlx::query_as::<_, CreditTransactionRow>(&format!(
            "SELECT {} FROM credit_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CreditTransaction::try_from).transpose()
    }

    async fn list_transactions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CreditTransaction>, RepositoryError> {
        let rows = sqlx::query_as::<_, CreditTransactionRow>(&format!(
            "SELECT {} FROM credit_transactions WHERE organization_id = $1 ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CreditTransaction::try_from).collect()
    }

    async fn finalize_crypto_payment(
        &self,
        payment_id: Uuid,
        verification: &PaymentVerification,
        now: DateTime<Utc>,
    ) -> Result<Option<CreditTransaction>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock order is payment row, then organization row. The expiry sweep
        // skips locked rows, so it never waits on us.
        let row = sqlx::query_as::<_, CreditTransactionRow>(&format!(
            "SELECT {} FROM credit_transactions WHERE id = $1 AND type = 'crypto_pending' FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let pending = CreditTransaction::try_from(row)?;
        let details = match pending.metadata {
            TransactionMetadata::CryptoPending(details) => details,
            _ => {
                return Err(RepositoryError::InvariantViolation(format!(
                    "crypto_pending row {} has non-crypto metadata",
                    payment_id
                )))
            }
        };
        if now > details.expires_at {
            return Ok(None);
        }

        let new_balance =
            lock_and_credit(&mut *tx, pending.organization_id, &verification.amount).await?;

        let description = format!(
            "Crypto purchase of ${} ({} on {})",
            verification.amount, details.currency, details.network
        );
        let metadata = TransactionMetadata::CryptoConfirmed {
            details,
            confirmations: verification.confirmations,
            block_number: verification.block_number,
        };

        let row = sqlx::query_as::<_, CreditTransactionRow>(&format!(
            r#"
            UPDATE credit_transactions
            SET type = $2, amount = $3, balance_after = $4, transaction_hash = $5,
                description = $6, metadata = $7
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(payment_id)
        .bind(TransactionType::Purchase.as_str())
        .bind(&verification.amount)
        .bind(&new_balance)
        .bind(&verification.transaction_hash)
        .bind(&description)
        .bind(Json(&metadata))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        CreditTransaction::try_from(row).map(Some)
    }

    async fn expire_crypto_payments(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE credit_transactions
            SET type = 'crypto_expired',
                metadata = metadata || jsonb_build_object('kind', 'crypto_expired', 'expired_at', $1::timestamptz)
            WHERE type = 'crypto_pending'
              AND id IN (
                SELECT id FROM credit_transactions
                WHERE type = 'crypto_pending'
                  AND (metadata->>'expires_at')::timestamptz < $1
                FOR UPDATE SKIP LOCKED
              )
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
