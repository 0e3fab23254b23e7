use crate::domain::registration::{PaymentInfo, PaymentStatus, Registration};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// Batas jumlah record per batch `find_expired_prepared`.
///
/// Sweeper mengambil batch berikutnya selama batch penuh, jadi satu putaran tetap
/// memproses semua record yang sudah expired.
pub const SWEEP_BATCH_LIMIT: i64 = 500;

/// Persistence untuk registration dan state pembayarannya.
///
/// Semua transisi status adalah conditional update: return `true` hanya kalau
/// record benar-benar berpindah state, sehingga dua notifikasi paralel untuk
/// record yang sama tidak bisa sama-sama sukses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn ping(&self) -> bool;

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Registration>>;

    /// Tulis attempt prepare baru, kecuali payment sudah completed
    async fn mark_prepared(&self, id: &str, info: &PaymentInfo) -> AppResult<bool>;

    /// prepared -> completed, hanya untuk prepare id yang sama dan belum expired
    async fn mark_completed(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        merchant_confirm_id: &str,
        completed_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// prepared -> failed karena Click membatalkan transaksi
    async fn cancel_prepared(&self, id: &str, merchant_prepare_id: &str) -> AppResult<bool>;

    /// Prepared yang sudah lewat expires_at, paling banyak [`SWEEP_BATCH_LIMIT`] per panggilan
    async fn find_expired_prepared(&self, now: DateTime<Utc>) -> AppResult<Vec<Registration>>;

    /// prepared -> failed karena expired, registration kembali ke pending
    async fn expire_prepared(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Manual override oleh admin
    async fn override_status(
        &self,
        id: &str,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Registration>>;
}

// Row mentah dari tabel registrations
#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: String,
    first_name: String,
    last_name: String,
    phone: String,
    email: String,
    price: Option<i64>,
    status: String,
    payment_status: String,
    click_trans_id: Option<String>,
    merchant_prepare_id: Option<String>,
    merchant_confirm_id: Option<String>,
    paid_amount: Option<i64>,
    prepared_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = AppError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let has_payment_info = row.merchant_prepare_id.is_some() || row.completed_at.is_some();
        let payment_info = has_payment_info.then(|| PaymentInfo {
            external_transaction_id: row.click_trans_id,
            merchant_prepare_id: row.merchant_prepare_id,
            merchant_confirm_id: row.merchant_confirm_id,
            amount: row.paid_amount,
            prepared_at: row.prepared_at,
            expires_at: row.expires_at,
            completed_at: row.completed_at,
        });

        Ok(Registration {
            status: row.status.parse().map_err(AppError::internal)?,
            payment_status: row.payment_status.parse().map_err(AppError::internal)?,
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            email: row.email,
            price: row.price,
            payment_info,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// Repository untuk operasi database registration
#[derive(Clone)]
pub struct PgRegistrationRepository {
    pool: PgPool,
}

impl PgRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationRepository {
    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok()
    }

    // Cari registration berdasarkan ID
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Registration>> {
        let row = sqlx::query_as::<_, RegistrationRow>("SELECT * FROM registrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Registration::try_from).transpose()
    }

    async fn mark_prepared(&self, id: &str, info: &PaymentInfo) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = 'prepared',
                click_trans_id = $2,
                merchant_prepare_id = $3,
                merchant_confirm_id = NULL,
                paid_amount = $4,
                prepared_at = $5,
                expires_at = $6,
                completed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND payment_status <> 'completed'
            "#,
        )
        .bind(id)
        .bind(&info.external_transaction_id)
        .bind(&info.merchant_prepare_id)
        .bind(info.amount)
        .bind(info.prepared_at)
        .bind(info.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        merchant_confirm_id: &str,
        completed_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = 'completed',
                status = 'paid',
                merchant_confirm_id = $3,
                completed_at = $4,
                updated_at = $4
            WHERE id = $1
              AND payment_status = 'prepared'
              AND merchant_prepare_id = $2
              AND merchant_confirm_id IS NULL
              AND expires_at >= $4
            "#,
        )
        .bind(id)
        .bind(merchant_prepare_id)
        .bind(merchant_confirm_id)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_prepared(&self, id: &str, merchant_prepare_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = 'failed',
                status = 'pending',
                updated_at = NOW()
            WHERE id = $1 AND payment_status = 'prepared' AND merchant_prepare_id = $2
            "#,
        )
        .bind(id)
        .bind(merchant_prepare_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_expired_prepared(&self, now: DateTime<Utc>) -> AppResult<Vec<Registration>> {
        let rows = sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT * FROM registrations
            WHERE payment_status = 'prepared' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(SWEEP_BATCH_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Registration::try_from).collect()
    }

    async fn expire_prepared(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET payment_status = 'failed',
                status = 'pending',
                updated_at = $3
            WHERE id = $1
              AND payment_status = 'prepared'
              AND merchant_prepare_id = $2
              AND expires_at < $3
            "#,
        )
        .bind(id)
        .bind(merchant_prepare_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn override_status(
        &self,
        id: &str,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Registration>> {
        let row = sqlx::query_as::<_, RegistrationRow>(
            r#"
            UPDATE registrations
            SET payment_status = $2::varchar,
                status = CASE WHEN $2::varchar = 'completed' THEN 'paid' ELSE status END,
                completed_at = CASE
                    WHEN $2::varchar = 'completed' AND $3::timestamptz IS NOT NULL THEN $3::timestamptz
                    ELSE completed_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payment_status.as_str())
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Registration::try_from).transpose()
    }
}
