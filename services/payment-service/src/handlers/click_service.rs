//! Handshake dua fase Click: prepare (reservasi attempt) dan complete (finalisasi).

use crate::config::ClickConfig;
use crate::domain::click::{
    CheckoutLinks, ClickAction, ClickButton, ClickError, ClickRequest, CompleteFields,
    CompleteResponse, PayByCard, PayByCardConfig, PrepareFields, PrepareResponse,
};
use crate::domain::registration::{PaymentInfo, PaymentStatus, Registration};
use crate::error::{AppError, AppResult};
use crate::middleware::origin::OriginValidator;
use crate::repositories::registration_repo::RegistrationStore;
use crate::utils::signature::{ClickSigner, SignatureFields, SignatureVariant};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

const CLICK_PAY_URL: &str = "https://my.click.uz/services/pay";

// Service untuk integrasi Click
pub struct ClickService {
    config: ClickConfig,
    signer: ClickSigner,
    origin: OriginValidator,
    store: Arc<dyn RegistrationStore>,
}

impl<'a> From<&PrepareFields<'a>> for SignatureFields<'a> {
    fn from(fields: &PrepareFields<'a>) -> Self {
        SignatureFields {
            click_trans_id: fields.click_trans_id,
            service_id: fields.service_id,
            merchant_trans_id: fields.merchant_trans_id,
            merchant_prepare_id: None,
            amount: fields.amount,
            action: fields.action,
            sign_time: fields.sign_time,
        }
    }
}

impl<'a> From<&CompleteFields<'a>> for SignatureFields<'a> {
    fn from(fields: &CompleteFields<'a>) -> Self {
        SignatureFields {
            merchant_prepare_id: Some(fields.merchant_prepare_id),
            ..SignatureFields::from(&fields.base)
        }
    }
}

fn generate_attempt_id(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}_{}", prefix, now.timestamp_millis(), Uuid::new_v4().simple())
}

// Log penolakan, security-relevant di level warn
fn log_rejection(event: &str, request: &ClickRequest, error: &ClickError) {
    let click_trans_id = request.click_trans_id.as_deref().unwrap_or("-");
    let merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-");
    let merchant_prepare_id = request.merchant_prepare_id.as_deref().unwrap_or("-");

    if error.is_security_relevant() {
        tracing::warn!(
            event,
            click_trans_id,
            merchant_trans_id,
            merchant_prepare_id,
            error_code = error.code(),
            reason = error.reason(),
            "❌ Click notification rejected"
        );
    } else {
        tracing::info!(
            event,
            click_trans_id,
            merchant_trans_id,
            merchant_prepare_id,
            error_code = error.code(),
            reason = error.reason(),
            "Click notification rejected"
        );
    }
}

impl ClickService {
    pub fn new(config: ClickConfig, store: Arc<dyn RegistrationStore>) -> Self {
        let signer = ClickSigner::new(config.secret_key.clone());
        let origin = OriginValidator::new(config.allowed_ips.clone(), config.is_production);
        Self {
            config,
            signer,
            origin,
            store,
        }
    }

    // Error internal tidak pernah keluar sebagai HTTP error, dicatat lalu jadi -9
    fn system_error(&self, stage: &str, request: &ClickRequest, err: AppError) -> ClickError {
        tracing::error!(
            stage,
            click_trans_id = request.click_trans_id.as_deref().unwrap_or("-"),
            merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-"),
            error = %err,
            "❌ Click processing failed"
        );
        ClickError::System
    }

    // Panggilan store dengan batas waktu, timeout diperlakukan sama seperti error store
    async fn call_store<T>(
        &self,
        stage: &str,
        request: &ClickRequest,
        call: impl Future<Output = AppResult<T>>,
    ) -> Result<T, ClickError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(|e| self.system_error(stage, request, e)),
            Err(_) => Err(self.system_error(
                stage,
                request,
                AppError::internal(format!(
                    "store call timed out after {}ms",
                    self.config.store_timeout.as_millis()
                )),
            )),
        }
    }

    async fn find_registration(
        &self,
        stage: &str,
        request: &ClickRequest,
        merchant_trans_id: &str,
    ) -> Result<Registration, ClickError> {
        let registration_id = self.config.registration_id(merchant_trans_id);
        if !shared::is_valid_registration_id(registration_id) {
            return Err(ClickError::OrderNotFound);
        }

        self.call_store(stage, request, self.store.find_by_id(registration_id))
            .await?
            .ok_or(ClickError::OrderNotFound)
    }

    /// Proses notifikasi prepare dari Click
    pub async fn handle_prepare(&self, request: &ClickRequest, source: Option<&str>) -> PrepareResponse {
        self.handle_prepare_at(request, source, Utc::now()).await
    }

    pub async fn handle_prepare_at(
        &self,
        request: &ClickRequest,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> PrepareResponse {
        tracing::info!(
            event = "CLICK_PREPARE_REQUEST",
            click_trans_id = request.click_trans_id.as_deref().unwrap_or("-"),
            click_paydoc_id = request.click_paydoc_id.as_deref().unwrap_or("-"),
            merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-"),
            amount = request.amount.as_deref().unwrap_or("-"),
            ip = source.unwrap_or("unknown"),
            "Click prepare received"
        );

        match self.prepare(request, source, now).await {
            Ok(merchant_prepare_id) => {
                tracing::info!(
                    event = "CLICK_PREPARE_SUCCESS",
                    click_trans_id = request.click_trans_id.as_deref().unwrap_or("-"),
                    merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-"),
                    merchant_prepare_id = %merchant_prepare_id,
                    "✅ Click prepare accepted"
                );
                PrepareResponse::success(request, merchant_prepare_id)
            }
            Err(error) => {
                log_rejection("CLICK_PREPARE_ERROR", request, &error);
                PrepareResponse::rejected(request, &error)
            }
        }
    }

    async fn prepare(
        &self,
        request: &ClickRequest,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, ClickError> {
        if !self.origin.is_allowed_origin(source) {
            return Err(ClickError::InvalidOrigin);
        }

        let fields = request.prepare_fields().ok_or(ClickError::MissingParameter)?;

        if !ClickAction::Prepare.matches(fields.action) {
            return Err(ClickError::InvalidPrepareAction);
        }

        let signed = SignatureFields::from(&fields);
        if !self.signer.verify(&signed, SignatureVariant::Prepare, fields.sign_string) {
            return Err(ClickError::InvalidSignature);
        }
        tracing::debug!(
            click_trans_id = fields.click_trans_id,
            click_paydoc_id = fields.click_paydoc_id,
            "Click prepare signature verified"
        );

        self.check_service_id(fields.service_id)?;

        let registration = self
            .find_registration("prepare", request, fields.merchant_trans_id)
            .await?;

        let expected_amount = registration.expected_amount(self.config.default_amount);
        if shared::parse_amount(fields.amount) != Some(BigDecimal::from(expected_amount)) {
            return Err(ClickError::IncorrectAmount);
        }

        if registration.is_paid() {
            return Err(ClickError::AlreadyPaid);
        }

        if registration.payment_status == PaymentStatus::Prepared && !registration.is_prepare_expired(now) {
            tracing::info!(
                registration_id = %registration.id,
                previous_prepare_id = registration.merchant_prepare_id().unwrap_or("-"),
                "Previous prepare attempt superseded"
            );
        }

        let expires_at = self
            .config
            .payment_timeout()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .ok_or_else(|| {
                self.system_error(
                    "prepare",
                    request,
                    AppError::internal(format!(
                        "payment timeout out of range: {} minutes",
                        self.config.payment_timeout_minutes
                    )),
                )
            })?;

        let merchant_prepare_id = generate_attempt_id("prep", now);
        let info = PaymentInfo::prepared(
            fields.click_trans_id,
            &merchant_prepare_id,
            expected_amount,
            now,
            expires_at,
        );

        let written = self
            .call_store("prepare", request, self.store.mark_prepared(&registration.id, &info))
            .await?;

        // Completed di antara read dan write
        if !written {
            return Err(ClickError::AlreadyPaid);
        }

        Ok(merchant_prepare_id)
    }

    /// Proses notifikasi complete dari Click
    pub async fn handle_complete(&self, request: &ClickRequest, source: Option<&str>) -> CompleteResponse {
        self.handle_complete_at(request, source, Utc::now()).await
    }

    pub async fn handle_complete_at(
        &self,
        request: &ClickRequest,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> CompleteResponse {
        tracing::info!(
            event = "CLICK_COMPLETE_REQUEST",
            click_trans_id = request.click_trans_id.as_deref().unwrap_or("-"),
            merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-"),
            click_paydoc_id = request.click_paydoc_id.as_deref().unwrap_or("-"),
            merchant_prepare_id = request.merchant_prepare_id.as_deref().unwrap_or("-"),
            amount = request.amount.as_deref().unwrap_or("-"),
            ip = source.unwrap_or("unknown"),
            "Click complete received"
        );

        match self.complete(request, source, now).await {
            Ok(merchant_confirm_id) => {
                tracing::info!(
                    event = "CLICK_COMPLETE_SUCCESS",
                    click_trans_id = request.click_trans_id.as_deref().unwrap_or("-"),
                    merchant_trans_id = request.merchant_trans_id.as_deref().unwrap_or("-"),
                    merchant_confirm_id = %merchant_confirm_id,
                    amount = request.amount.as_deref().unwrap_or("-"),
                    "✅ Click payment completed"
                );
                CompleteResponse::success(request, merchant_confirm_id)
            }
            Err(error) => {
                log_rejection("CLICK_COMPLETE_ERROR", request, &error);
                CompleteResponse::rejected(request, &error)
            }
        }
    }

    async fn complete(
        &self,
        request: &ClickRequest,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, ClickError> {
        if !self.origin.is_allowed_origin(source) {
            return Err(ClickError::InvalidOrigin);
        }

        let fields = request.complete_fields().ok_or(ClickError::MissingParameter)?;

        if !ClickAction::Complete.matches(fields.base.action) {
            return Err(ClickError::InvalidCompleteAction);
        }

        let signed = SignatureFields::from(&fields);
        if !self.signer.verify(&signed, SignatureVariant::Complete, fields.base.sign_string) {
            return Err(ClickError::InvalidSignature);
        }
        tracing::debug!(
            click_trans_id = fields.base.click_trans_id,
            click_paydoc_id = fields.base.click_paydoc_id,
            "Click complete signature verified"
        );

        let registration = self
            .find_registration("complete", request, fields.base.merchant_trans_id)
            .await?;

        if registration.merchant_prepare_id() != Some(fields.merchant_prepare_id) {
            return Err(ClickError::PrepareIdMismatch);
        }

        // Notifikasi ulang untuk transaksi yang sudah selesai: jawab dengan confirm id lama
        if registration.is_paid() {
            return Err(ClickError::AlreadyConfirmed(
                registration.merchant_confirm_id().map(str::to_string),
            ));
        }

        if registration.is_prepare_expired(now) {
            return Err(ClickError::SessionExpired);
        }

        if registration.payment_status != PaymentStatus::Prepared {
            return Err(ClickError::TransactionCancelled);
        }

        let prepared_amount = registration
            .payment_info
            .as_ref()
            .and_then(|info| info.amount)
            .unwrap_or_else(|| registration.expected_amount(self.config.default_amount));
        if shared::parse_amount(fields.base.amount) != Some(BigDecimal::from(prepared_amount)) {
            return Err(ClickError::IncorrectAmount);
        }

        if request.processor_reported_failure() {
            let cancelled = self
                .call_store(
                    "complete",
                    request,
                    self.store.cancel_prepared(&registration.id, fields.merchant_prepare_id),
                )
                .await?;
            if cancelled {
                tracing::warn!(
                    event = "PAYMENT_CANCELLED",
                    registration_id = %registration.id,
                    merchant_prepare_id = fields.merchant_prepare_id,
                    click_error = request.error.as_deref().unwrap_or("-"),
                    click_error_note = request.error_note.as_deref().unwrap_or("-"),
                    "Click reported payment failure, attempt cancelled"
                );
            }
            return Err(ClickError::TransactionCancelled);
        }

        let merchant_confirm_id = generate_attempt_id("conf", now);
        let written = self
            .call_store(
                "complete",
                request,
                self.store.mark_completed(
                    &registration.id,
                    fields.merchant_prepare_id,
                    &merchant_confirm_id,
                    now,
                ),
            )
            .await?;

        if written {
            return Ok(merchant_confirm_id);
        }

        // Kalah race dengan notifikasi lain atau sweeper, baca ulang state terbaru
        let current = self
            .call_store("complete", request, self.store.find_by_id(&registration.id))
            .await?
            .ok_or(ClickError::OrderNotFound)?;

        if current.is_paid() && current.merchant_prepare_id() == Some(fields.merchant_prepare_id) {
            Err(ClickError::AlreadyConfirmed(
                current.merchant_confirm_id().map(str::to_string),
            ))
        } else if current.merchant_prepare_id() != Some(fields.merchant_prepare_id) {
            Err(ClickError::PrepareIdMismatch)
        } else if current.is_prepare_expired(now) {
            Err(ClickError::SessionExpired)
        } else {
            Err(ClickError::TransactionCancelled)
        }
    }

    fn check_service_id(&self, raw: &str) -> Result<(), ClickError> {
        match raw.trim().parse::<i64>() {
            Ok(service_id) if service_id == self.config.service_id => Ok(()),
            _ => Err(ClickError::InvalidServiceId),
        }
    }

    /// Link checkout Click (redirect button dan config JS SDK pay by card)
    pub fn checkout_links(&self, registration_id: &str, amount: i64) -> CheckoutLinks {
        let transaction_param = self.config.transaction_param(registration_id);

        CheckoutLinks {
            click_button: ClickButton {
                url: format!(
                    "{}?service_id={}&merchant_id={}&amount={}&transaction_param={}&merchant_user_id={}",
                    CLICK_PAY_URL,
                    self.config.service_id,
                    self.config.merchant_id,
                    amount,
                    transaction_param,
                    self.config.merchant_user_id
                ),
                kind: "redirect".to_string(),
            },
            pay_by_card: PayByCard {
                kind: "javascript".to_string(),
                config: PayByCardConfig {
                    merchant_id: self.config.merchant_id,
                    service_id: self.config.service_id,
                    transaction_param,
                    amount,
                    merchant_user_id: self.config.merchant_user_id,
                },
            },
        }
    }

    /// Get environment info for service endpoint
    pub fn environment_info(&self) -> &'static str {
        if self.origin.is_enforced() {
            "production"
        } else {
            "development"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{click_config, TEST_SECRET};
    use crate::repositories::memory::InMemoryRegistrationStore;
    use crate::repositories::registration_repo::MockRegistrationStore;
    use chrono::Duration;

    const CLICK_IP: Option<&str> = Some("185.8.212.184");

    fn setup() -> (ClickService, Arc<InMemoryRegistrationStore>) {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let service = ClickService::new(click_config(), store.clone());
        (service, store)
    }

    async fn seed(store: &InMemoryRegistrationStore, id: &str, price: Option<i64>) {
        store.insert(InMemoryRegistrationStore::registration(id, price)).await;
    }

    fn signed(mut request: ClickRequest, variant: SignatureVariant) -> ClickRequest {
        let signer = ClickSigner::new(TEST_SECRET);
        let fields = SignatureFields {
            click_trans_id: request.click_trans_id.as_deref().unwrap_or_default(),
            service_id: request.service_id.as_deref().unwrap_or_default(),
            merchant_trans_id: request.merchant_trans_id.as_deref().unwrap_or_default(),
            merchant_prepare_id: request.merchant_prepare_id.as_deref(),
            amount: request.amount.as_deref().unwrap_or_default(),
            action: request.action.as_deref().unwrap_or_default(),
            sign_time: request.sign_time.as_deref().unwrap_or_default(),
        };
        request.sign_string = Some(signer.sign(&fields, variant));
        request
    }

    fn prepare_request(merchant_trans_id: &str, amount: &str) -> ClickRequest {
        signed(
            ClickRequest {
                click_trans_id: Some("2099001".to_string()),
                service_id: Some("82886".to_string()),
                click_paydoc_id: Some("3300001".to_string()),
                merchant_trans_id: Some(merchant_trans_id.to_string()),
                amount: Some(amount.to_string()),
                action: Some("0".to_string()),
                sign_time: Some("2024-05-01 10:00:00".to_string()),
                ..Default::default()
            },
            SignatureVariant::Prepare,
        )
    }

    fn complete_request(merchant_trans_id: &str, merchant_prepare_id: &str, amount: &str) -> ClickRequest {
        signed(
            ClickRequest {
                click_trans_id: Some("2099001".to_string()),
                service_id: Some("82886".to_string()),
                click_paydoc_id: Some("3300001".to_string()),
                merchant_trans_id: Some(merchant_trans_id.to_string()),
                merchant_prepare_id: Some(merchant_prepare_id.to_string()),
                amount: Some(amount.to_string()),
                action: Some("1".to_string()),
                sign_time: Some("2024-05-01 10:01:00".to_string()),
                error: Some("0".to_string()),
                ..Default::default()
            },
            SignatureVariant::Complete,
        )
    }

    async fn prepared(service: &ClickService, id: &str, amount: &str, now: DateTime<Utc>) -> String {
        let response = service
            .handle_prepare_at(&prepare_request(id, amount), CLICK_IP, now)
            .await;
        assert_eq!(response.error, 0, "prepare failed: {}", response.error_note);
        response.merchant_prepare_id.unwrap()
    }

    #[tokio::test]
    async fn test_prepare_success_marks_registration_prepared() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, now)
            .await;

        assert_eq!(response.error, 0);
        assert_eq!(response.error_note, "Success");
        assert_eq!(response.click_trans_id.as_deref(), Some("2099001"));
        assert_eq!(response.merchant_trans_id.as_deref(), Some("reg-1"));

        let reg = store.get("reg-1").await.unwrap();
        let info = reg.payment_info.unwrap();
        assert_eq!(reg.payment_status, PaymentStatus::Prepared);
        assert_eq!(info.merchant_prepare_id, response.merchant_prepare_id);
        assert_eq!(info.external_transaction_id.as_deref(), Some("2099001"));
        assert_eq!(info.amount, Some(50000));
        assert_eq!(info.expires_at, Some(now + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn test_prepare_ids_are_unique_per_attempt() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let first = prepared(&service, "reg-1", "50000", now).await;
        let second = prepared(&service, "reg-1", "50000", now).await;

        assert_ne!(first, second);
        let reg = store.get("reg-1").await.unwrap();
        assert_eq!(reg.merchant_prepare_id(), Some(second.as_str()));
    }

    #[tokio::test]
    async fn test_prepare_accepts_prefixed_transaction_id() {
        let (service, store) = setup();
        seed(&store, "reg-7", Some(50000)).await;

        let response = service
            .handle_prepare_at(&prepare_request("ielts_reg-7", "50000"), CLICK_IP, Utc::now())
            .await;

        assert_eq!(response.error, 0);
        assert_eq!(response.merchant_trans_id.as_deref(), Some("ielts_reg-7"));
        assert_eq!(
            store.get("reg-7").await.unwrap().payment_status,
            PaymentStatus::Prepared
        );
    }

    #[tokio::test]
    async fn test_prepare_uses_default_amount_without_price() {
        let (service, store) = setup();
        seed(&store, "reg-1", None).await;

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "2000"), CLICK_IP, Utc::now())
            .await;
        assert_eq!(response.error, 0);
    }

    #[tokio::test]
    async fn test_prepare_accepts_decimal_amount_text() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000.00"), CLICK_IP, Utc::now())
            .await;
        assert_eq!(response.error, 0);
    }

    #[tokio::test]
    async fn test_prepare_rejects_tampered_field() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;

        let mut request = prepare_request("reg-1", "50000");
        request.amount = Some("500".to_string());

        let response = service.handle_prepare_at(&request, CLICK_IP, Utc::now()).await;

        assert_eq!(response.error, -1);
        assert_eq!(response.merchant_prepare_id, None);
        assert_eq!(
            store.get("reg-1").await.unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_prepare_rejects_wrong_amount_without_state_change() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "40000"), CLICK_IP, Utc::now())
            .await;

        assert_eq!(response.error, -2);
        assert_eq!(response.error_note, "Incorrect amount");
        let reg = store.get("reg-1").await.unwrap();
        assert_eq!(reg.payment_status, PaymentStatus::Pending);
        assert!(reg.payment_info.is_none());
    }

    #[tokio::test]
    async fn test_prepare_rejects_already_paid() {
        let (service, store) = setup();
        let mut reg = InMemoryRegistrationStore::registration("reg-1", Some(50000));
        reg.payment_status = PaymentStatus::Completed;
        store.insert(reg).await;

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, Utc::now())
            .await;
        assert_eq!(response.error, -4);
    }

    #[tokio::test]
    async fn test_prepare_rejects_unknown_service_and_order() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;

        let mut wrong_service = prepare_request("reg-1", "50000");
        wrong_service.service_id = Some("11111".to_string());
        let wrong_service = signed(wrong_service, SignatureVariant::Prepare);
        let response = service.handle_prepare_at(&wrong_service, CLICK_IP, Utc::now()).await;
        assert_eq!(response.error, -5);
        assert_eq!(response.error_note, "Service ID is incorrect");

        let response = service
            .handle_prepare_at(&prepare_request("reg-missing", "50000"), CLICK_IP, Utc::now())
            .await;
        assert_eq!(response.error, -5);
        assert_eq!(response.error_note, "Order not found");
    }

    #[tokio::test]
    async fn test_prepare_rejects_missing_field_and_wrong_action() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;

        let mut missing = prepare_request("reg-1", "50000");
        missing.sign_time = None;
        let response = service.handle_prepare_at(&missing, CLICK_IP, Utc::now()).await;
        assert_eq!(response.error, -8);

        let mut blank = prepare_request("reg-1", "50000");
        blank.click_paydoc_id = Some("  ".to_string());
        let response = service.handle_prepare_at(&blank, CLICK_IP, Utc::now()).await;
        assert_eq!(response.error, -8);

        let mut wrong_action = prepare_request("reg-1", "50000");
        wrong_action.action = Some("1".to_string());
        let wrong_action = signed(wrong_action, SignatureVariant::Prepare);
        let response = service.handle_prepare_at(&wrong_action, CLICK_IP, Utc::now()).await;
        assert_eq!(response.error, -3);
    }

    #[tokio::test]
    async fn test_origin_enforced_only_in_production() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        seed(&store, "reg-1", Some(50000)).await;

        let mut config = click_config();
        config.is_production = true;
        let production = ClickService::new(config, store.clone());

        let response = production
            .handle_prepare_at(&prepare_request("reg-1", "50000"), Some("10.1.2.3"), Utc::now())
            .await;
        assert_eq!(response.error, -9);
        assert_eq!(response.error_note, "Invalid request origin");

        let response = production
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, Utc::now())
            .await;
        assert_eq!(response.error, 0);

        let (development, dev_store) = setup();
        seed(&dev_store, "reg-1", Some(50000)).await;
        let response = development
            .handle_prepare_at(&prepare_request("reg-1", "50000"), Some("10.1.2.3"), Utc::now())
            .await;
        assert_eq!(response.error, 0);
    }

    #[tokio::test]
    async fn test_prepare_then_complete_marks_paid() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let completed_at = now + Duration::minutes(2);
        let response = service
            .handle_complete_at(
                &complete_request("reg-1", &prepare_id, "50000"),
                CLICK_IP,
                completed_at,
            )
            .await;

        assert_eq!(response.error, 0);
        assert!(response.merchant_confirm_id.is_some());

        let reg = store.get("reg-1").await.unwrap();
        assert_eq!(reg.payment_status, PaymentStatus::Completed);
        assert_eq!(reg.status, crate::domain::registration::RegistrationStatus::Paid);
        assert_eq!(reg.merchant_confirm_id(), response.merchant_confirm_id.as_deref());
        assert_eq!(reg.payment_info.unwrap().completed_at, Some(completed_at));
    }

    #[tokio::test]
    async fn test_repeated_complete_is_idempotent() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let request = complete_request("reg-1", &prepare_id, "50000");
        let first = service
            .handle_complete_at(&request, CLICK_IP, now + Duration::minutes(1))
            .await;
        assert_eq!(first.error, 0);
        let completed_at = store.get("reg-1").await.unwrap().payment_info.unwrap().completed_at;

        let second = service
            .handle_complete_at(&request, CLICK_IP, now + Duration::minutes(3))
            .await;

        assert_eq!(second.error, -4);
        assert_eq!(second.merchant_confirm_id, first.merchant_confirm_id);
        let reg = store.get("reg-1").await.unwrap();
        assert_eq!(reg.payment_info.unwrap().completed_at, completed_at);
    }

    #[tokio::test]
    async fn test_complete_after_expiry_rejected() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let response = service
            .handle_complete_at(
                &complete_request("reg-1", &prepare_id, "50000"),
                CLICK_IP,
                now + Duration::minutes(16),
            )
            .await;

        assert_eq!(response.error, -6);
        assert_eq!(response.error_note, "Payment session expired");
        assert_eq!(
            store.get("reg-1").await.unwrap().payment_status,
            PaymentStatus::Prepared
        );
    }

    #[tokio::test]
    async fn test_complete_rejects_prepare_id_mismatch() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        prepared(&service, "reg-1", "50000", now).await;
        let before = store.get("reg-1").await.unwrap();

        let response = service
            .handle_complete_at(
                &complete_request("reg-1", "prep_stale", "50000"),
                CLICK_IP,
                now + Duration::minutes(1),
            )
            .await;

        assert_eq!(response.error, -6);
        assert_eq!(response.error_note, "Transaction not found");
        let after = store.get("reg-1").await.unwrap();
        assert_eq!(after.payment_status, before.payment_status);
        assert_eq!(after.merchant_prepare_id(), before.merchant_prepare_id());
    }

    #[tokio::test]
    async fn test_superseded_prepare_id_cannot_complete() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let first = prepared(&service, "reg-1", "50000", now).await;
        prepared(&service, "reg-1", "50000", now).await;

        let response = service
            .handle_complete_at(&complete_request("reg-1", &first, "50000"), CLICK_IP, now)
            .await;
        assert_eq!(response.error, -6);
    }

    #[tokio::test]
    async fn test_complete_rejects_wrong_amount() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let response = service
            .handle_complete_at(&complete_request("reg-1", &prepare_id, "49999"), CLICK_IP, now)
            .await;

        assert_eq!(response.error, -2);
        assert_eq!(
            store.get("reg-1").await.unwrap().payment_status,
            PaymentStatus::Prepared
        );
    }

    #[tokio::test]
    async fn test_complete_with_processor_error_cancels_attempt() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let mut request = complete_request("reg-1", &prepare_id, "50000");
        request.error = Some("-5017".to_string());
        request.error_note = Some("Insufficient funds".to_string());

        let response = service.handle_complete_at(&request, CLICK_IP, now).await;

        assert_eq!(response.error, -9);
        assert_eq!(response.merchant_confirm_id, None);
        let reg = store.get("reg-1").await.unwrap();
        assert_eq!(reg.payment_status, PaymentStatus::Failed);
        assert!(!reg.is_paid());
    }

    #[tokio::test]
    async fn test_complete_rejects_wrong_action_and_bad_signature() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();
        let prepare_id = prepared(&service, "reg-1", "50000", now).await;

        let mut wrong_action = complete_request("reg-1", &prepare_id, "50000");
        wrong_action.action = Some("0".to_string());
        let wrong_action = signed(wrong_action, SignatureVariant::Complete);
        let response = service.handle_complete_at(&wrong_action, CLICK_IP, now).await;
        assert_eq!(response.error, -3);

        // Signature prepare tidak berlaku untuk complete
        let prepare_signed = signed(
            complete_request("reg-1", &prepare_id, "50000"),
            SignatureVariant::Prepare,
        );
        let response = service.handle_complete_at(&prepare_signed, CLICK_IP, now).await;
        assert_eq!(response.error, -1);

        let mut missing = complete_request("reg-1", &prepare_id, "50000");
        missing.merchant_prepare_id = None;
        let response = service.handle_complete_at(&missing, CLICK_IP, now).await;
        assert_eq!(response.error, -8);
    }

    #[tokio::test]
    async fn test_store_failure_becomes_system_error() {
        let mut mock = MockRegistrationStore::new();
        mock.expect_find_by_id()
            .returning(|_| Err(AppError::internal("connection reset")));
        let service = ClickService::new(click_config(), Arc::new(mock));

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, Utc::now())
            .await;

        assert_eq!(response.error, -9);
        assert_eq!(response.error_note, "System error");
    }

    #[tokio::test]
    async fn test_lost_complete_race_reports_existing_confirmation() {
        let now = Utc::now();
        let mut pending = InMemoryRegistrationStore::registration("reg-1", Some(50000));
        pending.payment_status = PaymentStatus::Prepared;
        pending.payment_info = Some(PaymentInfo::prepared(
            "2099001",
            "prep_1",
            50000,
            now,
            now + Duration::minutes(15),
        ));
        let mut paid = pending.clone();
        paid.payment_status = PaymentStatus::Completed;
        if let Some(info) = paid.payment_info.as_mut() {
            info.merchant_confirm_id = Some("conf_winner".to_string());
        }

        let mut mock = MockRegistrationStore::new();
        let mut reads = vec![paid, pending];
        mock.expect_find_by_id()
            .times(2)
            .returning(move |_| Ok(reads.pop()));
        mock.expect_mark_completed()
            .times(1)
            .returning(|_, _, _, _| Ok(false));
        let service = ClickService::new(click_config(), Arc::new(mock));

        let response = service
            .handle_complete_at(&complete_request("reg-1", "prep_1", "50000"), CLICK_IP, now)
            .await;

        assert_eq!(response.error, -4);
        assert_eq!(response.merchant_confirm_id.as_deref(), Some("conf_winner"));
    }

    #[tokio::test]
    async fn test_slow_store_becomes_system_error() {
        let store = Arc::new(InMemoryRegistrationStore::with_lookup_delay(
            std::time::Duration::from_secs(30),
        ));
        seed(&store, "reg-1", Some(50000)).await;
        let mut config = click_config();
        config.store_timeout = std::time::Duration::from_millis(50);
        let service = ClickService::new(config, store.clone());

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, Utc::now())
            .await;

        assert_eq!(response.error, -9);
        assert_eq!(response.error_note, "System error");
        assert_eq!(
            store.get("reg-1").await.unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_becomes_system_error() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        seed(&store, "reg-1", Some(50000)).await;
        let mut config = click_config();
        config.payment_timeout_minutes = 1_000_000_000_000;
        let service = ClickService::new(config, store.clone());

        let response = service
            .handle_prepare_at(&prepare_request("reg-1", "50000"), CLICK_IP, Utc::now())
            .await;

        assert_eq!(response.error, -9);
        assert!(store.get("reg-1").await.unwrap().payment_info.is_none());
    }

    #[tokio::test]
    async fn test_repeat_complete_after_expiry_still_reports_confirmation() {
        let (service, store) = setup();
        seed(&store, "reg-1", Some(50000)).await;
        let now = Utc::now();

        let prepare_id = prepared(&service, "reg-1", "50000", now).await;
        let request = complete_request("reg-1", &prepare_id, "50000");
        let first = service
            .handle_complete_at(&request, CLICK_IP, now + Duration::minutes(1))
            .await;
        assert_eq!(first.error, 0);

        // Retry dari Click setelah expires_at lewat
        let retry = service
            .handle_complete_at(&request, CLICK_IP, now + Duration::minutes(20))
            .await;

        assert_eq!(retry.error, -4);
        assert_eq!(retry.error_note, "Already confirmed");
        assert_eq!(retry.merchant_confirm_id, first.merchant_confirm_id);
        assert!(store.get("reg-1").await.unwrap().is_paid());
    }

    #[test]
    fn test_checkout_links() {
        let service = ClickService::new(click_config(), Arc::new(InMemoryRegistrationStore::new()));
        let links = service.checkout_links("reg-1", 50000);

        assert_eq!(
            links.click_button.url,
            "https://my.click.uz/services/pay?service_id=82886&merchant_id=46111&amount=50000&transaction_param=ielts_reg-1&merchant_user_id=64082"
        );
        assert_eq!(links.pay_by_card.config.transaction_param, "ielts_reg-1");
        assert_eq!(links.pay_by_card.config.amount, 50000);
        assert_eq!(service.environment_info(), "development");
    }
}
