// In-memory store untuk unit test, semantik sama dengan conditional update di Postgres

use super::registration_repo::RegistrationStore;
use crate::domain::registration::{
    PaymentInfo, PaymentStatus, Registration, RegistrationStatus,
};
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRegistrationStore {
    records: RwLock<HashMap<String, Registration>>,
    // Simulasi database yang lambat, berlaku untuk find_by_id
    lookup_delay: Option<Duration>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup_delay(delay: Duration) -> Self {
        Self {
            lookup_delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn insert(&self, registration: Registration) {
        self.records
            .write()
            .await
            .insert(registration.id.clone(), registration);
    }

    pub async fn get(&self, id: &str) -> Option<Registration> {
        self.records.read().await.get(id).cloned()
    }

    /// Registration baru dengan status pending dan tanpa payment info
    pub fn registration(id: &str, price: Option<i64>) -> Registration {
        let now = Utc::now();
        Registration {
            id: id.to_string(),
            first_name: "Dilnoza".to_string(),
            last_name: "Rahimova".to_string(),
            phone: "+998901112233".to_string(),
            email: "dilnoza@example.com".to_string(),
            price,
            status: RegistrationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_info: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<Registration>> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.get(id).await)
    }

    async fn mark_prepared(&self, id: &str, info: &PaymentInfo) -> AppResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(reg) if reg.payment_status != PaymentStatus::Completed => {
                reg.payment_info = Some(info.clone());
                reg.payment_status = PaymentStatus::Prepared;
                reg.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        merchant_confirm_id: &str,
        completed_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.write().await;
        let Some(reg) = records.get_mut(id) else {
            return Ok(false);
        };
        if reg.payment_status != PaymentStatus::Prepared
            || reg.merchant_prepare_id() != Some(merchant_prepare_id)
            || reg.merchant_confirm_id().is_some()
            || reg.is_prepare_expired(completed_at)
        {
            return Ok(false);
        }

        if let Some(info) = reg.payment_info.as_mut() {
            info.merchant_confirm_id = Some(merchant_confirm_id.to_string());
            info.completed_at = Some(completed_at);
        }
        reg.payment_status = PaymentStatus::Completed;
        reg.status = RegistrationStatus::Paid;
        reg.updated_at = completed_at;
        Ok(true)
    }

    async fn cancel_prepared(&self, id: &str, merchant_prepare_id: &str) -> AppResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(reg)
                if reg.payment_status == PaymentStatus::Prepared
                    && reg.merchant_prepare_id() == Some(merchant_prepare_id) =>
            {
                reg.payment_status = PaymentStatus::Failed;
                reg.status = RegistrationStatus::Pending;
                reg.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_expired_prepared(&self, now: DateTime<Utc>) -> AppResult<Vec<Registration>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|reg| {
                reg.payment_status == PaymentStatus::Prepared
                    && reg
                        .payment_info
                        .as_ref()
                        .and_then(|info| info.expires_at)
                        .map(|expires_at| expires_at < now)
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn expire_prepared(
        &self,
        id: &str,
        merchant_prepare_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(reg)
                if reg.payment_status == PaymentStatus::Prepared
                    && reg.merchant_prepare_id() == Some(merchant_prepare_id)
                    && reg.is_prepare_expired(now) =>
            {
                reg.payment_status = PaymentStatus::Failed;
                reg.status = RegistrationStatus::Pending;
                reg.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn override_status(
        &self,
        id: &str,
        payment_status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Registration>> {
        let mut records = self.records.write().await;
        let Some(reg) = records.get_mut(id) else {
            return Ok(None);
        };

        reg.payment_status = payment_status;
        if payment_status == PaymentStatus::Completed {
            reg.status = RegistrationStatus::Paid;
            if let Some(paid_at) = paid_at {
                reg.payment_info
                    .get_or_insert_with(|| PaymentInfo {
                        external_transaction_id: None,
                        merchant_prepare_id: None,
                        merchant_confirm_id: None,
                        amount: None,
                        prepared_at: None,
                        expires_at: None,
                        completed_at: None,
                    })
                    .completed_at = Some(paid_at);
            }
        }
        reg.updated_at = Utc::now();
        Ok(Some(reg.clone()))
    }
}
