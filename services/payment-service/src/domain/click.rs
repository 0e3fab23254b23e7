use serde::{Deserialize, Deserializer, Serialize};

/// Action code yang dikirim Click pada setiap notifikasi
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    Prepare,
    Complete,
}

impl ClickAction {
    pub fn code(&self) -> i64 {
        match self {
            ClickAction::Prepare => 0,
            ClickAction::Complete => 1,
        }
    }

    /// Cocokkan action string dari request dengan action yang diharapkan
    pub fn matches(&self, raw: &str) -> bool {
        raw.trim().parse::<i64>().map(|code| code == self.code()).unwrap_or(false)
    }
}

/// Notifikasi prepare/complete dari Click.
///
/// Semua field disimpan dalam bentuk string persis seperti yang ditandatangani Click,
/// karena signature dihitung atas representasi text, bukan nilai numerik.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClickRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub click_trans_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub service_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub click_paydoc_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub merchant_trans_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub merchant_prepare_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sign_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sign_string: Option<String>,
    /// Status dari sisi Click, negatif berarti pembayaran gagal di Click
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error_note: Option<String>,
}

/// Field wajib prepare yang sudah lolos presence check
#[derive(Debug, Clone, Copy)]
pub struct PrepareFields<'a> {
    pub click_trans_id: &'a str,
    pub service_id: &'a str,
    pub click_paydoc_id: &'a str,
    pub merchant_trans_id: &'a str,
    pub amount: &'a str,
    pub action: &'a str,
    pub sign_time: &'a str,
    pub sign_string: &'a str,
}

/// Field wajib complete, prepare fields plus merchant_prepare_id
#[derive(Debug, Clone, Copy)]
pub struct CompleteFields<'a> {
    pub base: PrepareFields<'a>,
    pub merchant_prepare_id: &'a str,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl ClickRequest {
    pub fn prepare_fields(&self) -> Option<PrepareFields<'_>> {
        Some(PrepareFields {
            click_trans_id: present(&self.click_trans_id)?,
            service_id: present(&self.service_id)?,
            click_paydoc_id: present(&self.click_paydoc_id)?,
            merchant_trans_id: present(&self.merchant_trans_id)?,
            amount: present(&self.amount)?,
            action: present(&self.action)?,
            sign_time: present(&self.sign_time)?,
            sign_string: present(&self.sign_string)?,
        })
    }

    pub fn complete_fields(&self) -> Option<CompleteFields<'_>> {
        Some(CompleteFields {
            base: self.prepare_fields()?,
            merchant_prepare_id: present(&self.merchant_prepare_id)?,
        })
    }

    /// Click melaporkan pembayaran gagal di sisinya (error < 0)
    pub fn processor_reported_failure(&self) -> bool {
        present(&self.error)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|code| code < 0)
            .unwrap_or(false)
    }
}

/// Terima string, angka, atau null, dan simpan sebagai text.
///
/// Angka float tanpa pecahan ditulis tanpa ".0" agar sama dengan text yang ditandatangani Click.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientVisitor;

    impl<'de> serde::de::Visitor<'de> for LenientVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string, a number, or null")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: serde::de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v.fract() == 0.0 && v.abs() < 1e15 {
                Ok(Some(format!("{}", v as i64)))
            } else {
                Ok(Some(v.to_string()))
            }
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(LenientVisitor)
        }
    }

    deserializer.deserialize_any(LenientVisitor)
}

/// Penolakan protokol Click.
///
/// Kode dan note diwajibkan oleh protokol Click, semua mapping ada di [`ClickError::wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickError {
    InvalidOrigin,
    MissingParameter,
    InvalidPrepareAction,
    InvalidCompleteAction,
    InvalidSignature,
    InvalidServiceId,
    OrderNotFound,
    IncorrectAmount,
    AlreadyPaid,
    /// Complete ulang untuk transaksi yang sudah selesai, membawa confirm id lama
    AlreadyConfirmed(Option<String>),
    PrepareIdMismatch,
    SessionExpired,
    TransactionCancelled,
    System,
}

impl ClickError {
    /// Tabel tunggal kode error dan note untuk wire response
    pub fn wire(&self) -> (i32, &'static str) {
        match self {
            ClickError::InvalidOrigin => (-9, "Invalid request origin"),
            ClickError::MissingParameter => (-8, "Required parameter missing"),
            ClickError::InvalidPrepareAction => (-3, "Invalid action for prepare"),
            ClickError::InvalidCompleteAction => (-3, "Invalid action for complete"),
            ClickError::InvalidSignature => (-1, "Invalid signature"),
            ClickError::InvalidServiceId => (-5, "Service ID is incorrect"),
            ClickError::OrderNotFound => (-5, "Order not found"),
            ClickError::IncorrectAmount => (-2, "Incorrect amount"),
            ClickError::AlreadyPaid => (-4, "Already paid"),
            ClickError::AlreadyConfirmed(_) => (-4, "Already confirmed"),
            ClickError::PrepareIdMismatch => (-6, "Transaction not found"),
            ClickError::SessionExpired => (-6, "Payment session expired"),
            ClickError::TransactionCancelled => (-9, "Transaction cancelled"),
            ClickError::System => (-9, "System error"),
        }
    }

    pub fn code(&self) -> i32 {
        self.wire().0
    }

    pub fn note(&self) -> &'static str {
        self.wire().1
    }

    /// Alasan untuk log, membedakan penyebab yang berbagi kode yang sama
    pub fn reason(&self) -> &'static str {
        match self {
            ClickError::InvalidOrigin => "origin_not_allowed",
            ClickError::MissingParameter => "missing_parameter",
            ClickError::InvalidPrepareAction | ClickError::InvalidCompleteAction => "invalid_action",
            ClickError::InvalidSignature => "signature_mismatch",
            ClickError::InvalidServiceId => "service_id_mismatch",
            ClickError::OrderNotFound => "order_not_found",
            ClickError::IncorrectAmount => "amount_mismatch",
            ClickError::AlreadyPaid => "already_paid",
            ClickError::AlreadyConfirmed(_) => "already_confirmed",
            ClickError::PrepareIdMismatch => "prepare_id_mismatch",
            ClickError::SessionExpired => "prepare_expired",
            ClickError::TransactionCancelled => "processor_cancelled",
            ClickError::System => "system_error",
        }
    }

    /// Penolakan yang relevan untuk security audit
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, ClickError::InvalidOrigin | ClickError::InvalidSignature)
    }
}

impl std::fmt::Display for ClickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (code, note) = self.wire();
        write!(f, "{} ({})", note, code)
    }
}

impl std::error::Error for ClickError {}

// Response prepare ke Click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PrepareResponse {
    pub click_trans_id: Option<String>,
    pub merchant_trans_id: Option<String>,
    pub merchant_prepare_id: Option<String>,
    pub error: i32,
    pub error_note: String,
}

// Response complete ke Click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CompleteResponse {
    pub click_trans_id: Option<String>,
    pub merchant_trans_id: Option<String>,
    pub merchant_confirm_id: Option<String>,
    pub error: i32,
    pub error_note: String,
}

impl PrepareResponse {
    pub fn success(request: &ClickRequest, merchant_prepare_id: String) -> Self {
        Self {
            click_trans_id: request.click_trans_id.clone(),
            merchant_trans_id: request.merchant_trans_id.clone(),
            merchant_prepare_id: Some(merchant_prepare_id),
            error: 0,
            error_note: "Success".to_string(),
        }
    }

    pub fn rejected(request: &ClickRequest, error: &ClickError) -> Self {
        Self {
            click_trans_id: request.click_trans_id.clone(),
            merchant_trans_id: request.merchant_trans_id.clone(),
            merchant_prepare_id: None,
            error: error.code(),
            error_note: error.note().to_string(),
        }
    }
}

impl CompleteResponse {
    pub fn success(request: &ClickRequest, merchant_confirm_id: String) -> Self {
        Self {
            click_trans_id: request.click_trans_id.clone(),
            merchant_trans_id: request.merchant_trans_id.clone(),
            merchant_confirm_id: Some(merchant_confirm_id),
            error: 0,
            error_note: "Success".to_string(),
        }
    }

    pub fn rejected(request: &ClickRequest, error: &ClickError) -> Self {
        let merchant_confirm_id = match error {
            ClickError::AlreadyConfirmed(confirm_id) => confirm_id.clone(),
            _ => None,
        };

        Self {
            click_trans_id: request.click_trans_id.clone(),
            merchant_trans_id: request.merchant_trans_id.clone(),
            merchant_confirm_id,
            error: error.code(),
            error_note: error.note().to_string(),
        }
    }
}

// Request buat checkout link Click
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub registration_id: String,
    pub amount: Option<i64>,
}

// Link redirect ke halaman Click
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClickButton {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

// Config untuk Click JS SDK (pay by card)
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PayByCardConfig {
    pub merchant_id: i64,
    pub service_id: i64,
    pub transaction_param: String,
    pub amount: i64,
    pub merchant_user_id: i64,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PayByCard {
    #[serde(rename = "type")]
    pub kind: String,
    pub config: PayByCardConfig,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLinks {
    pub click_button: ClickButton,
    pub pay_by_card: PayByCard,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CheckoutRegistration {
    pub id: String,
    pub student: String,
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub payment_data: CheckoutLinks,
    pub amount: i64,
    pub registration: CheckoutRegistration,
}
