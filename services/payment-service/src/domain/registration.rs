use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// Registration IELTS beserta state pembayarannya
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,

    // Harga dari schedule/plan, None kalau belum diset
    pub price: Option<i64>,

    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
    pub payment_info: Option<PaymentInfo>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Detail attempt pembayaran Click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub external_transaction_id: Option<String>,
    pub merchant_prepare_id: Option<String>,
    pub merchant_confirm_id: Option<String>,
    pub amount: Option<i64>,
    pub prepared_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentInfo {
    /// Info baru hasil prepare, confirm id dan completed_at masih kosong
    pub fn prepared(
        external_transaction_id: &str,
        merchant_prepare_id: &str,
        amount: i64,
        prepared_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_transaction_id: Some(external_transaction_id.to_string()),
            merchant_prepare_id: Some(merchant_prepare_id.to_string()),
            merchant_confirm_id: None,
            amount: Some(amount),
            prepared_at: Some(prepared_at),
            expires_at: Some(expires_at),
            completed_at: None,
        }
    }
}

// Status payment pada registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, utoipa::ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Prepared,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Prepared => "prepared",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "prepared" => Ok(PaymentStatus::Prepared),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

// Status registration level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, utoipa::ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Scheduled,
    Paid,
    Completed,
    Cancelled,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Scheduled => "scheduled",
            RegistrationStatus::Paid => "paid",
            RegistrationStatus::Completed => "completed",
            RegistrationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RegistrationStatus::Pending),
            "scheduled" => Ok(RegistrationStatus::Scheduled),
            "paid" => Ok(RegistrationStatus::Paid),
            "completed" => Ok(RegistrationStatus::Completed),
            "cancelled" => Ok(RegistrationStatus::Cancelled),
            other => Err(format!("Unknown registration status: {}", other)),
        }
    }
}

// Business logic methods
impl Registration {
    /// Amount yang harus dibayar, fallback ke default kalau price belum ada
    pub fn expected_amount(&self, default_amount: i64) -> i64 {
        self.price.unwrap_or(default_amount)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Completed
    }

    pub fn merchant_prepare_id(&self) -> Option<&str> {
        self.payment_info
            .as_ref()
            .and_then(|info| info.merchant_prepare_id.as_deref())
    }

    pub fn merchant_confirm_id(&self) -> Option<&str> {
        self.payment_info
            .as_ref()
            .and_then(|info| info.merchant_confirm_id.as_deref())
    }

    /// Cek apakah attempt prepare sudah lewat expiry
    pub fn is_prepare_expired(&self, now: DateTime<Utc>) -> bool {
        self.payment_info
            .as_ref()
            .and_then(|info| info.expires_at)
            .map(|expires_at| now > expires_at)
            .unwrap_or(false)
    }

    pub fn student_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// Response status pembayaran untuk user panel
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub payment_status: PaymentStatus,
    pub payment_info: Option<PaymentInfo>,
    pub registration_status: RegistrationStatus,
}

impl From<&Registration> for PaymentStatusView {
    fn from(registration: &Registration) -> Self {
        Self {
            payment_status: registration.payment_status,
            payment_info: registration.payment_info.clone(),
            registration_status: registration.status,
        }
    }
}

// Request manual update status oleh admin
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub registration_id: String,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}
