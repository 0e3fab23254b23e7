// Signature engine untuk notifikasi Click (MD5 sesuai dokumentasi Click)

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

/// Varian signature, menentukan urutan field yang di-hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVariant {
    Prepare,
    Complete,
}

/// Field transaksi yang ikut ditandatangani, dalam bentuk text persis dari request
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureFields<'a> {
    pub click_trans_id: &'a str,
    pub service_id: &'a str,
    pub merchant_trans_id: &'a str,
    pub merchant_prepare_id: Option<&'a str>,
    pub amount: &'a str,
    pub action: &'a str,
    pub sign_time: &'a str,
}

#[derive(Clone)]
pub struct ClickSigner {
    secret_key: String,
}

impl std::fmt::Debug for ClickSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickSigner").field("secret_key", &"***").finish()
    }
}

impl ClickSigner {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
        }
    }

    /// Susun sign string sesuai urutan Click.
    ///
    /// Prepare: click_trans_id, service_id, secret, merchant_trans_id, amount, action, sign_time.
    /// Complete: sama, dengan merchant_prepare_id di antara merchant_trans_id dan amount.
    /// Return None kalau varian complete tapi merchant_prepare_id tidak ada.
    fn sign_string(&self, fields: &SignatureFields<'_>, variant: SignatureVariant) -> Option<String> {
        let mut out = String::with_capacity(128);
        out.push_str(fields.click_trans_id);
        out.push_str(fields.service_id);
        out.push_str(&self.secret_key);
        out.push_str(fields.merchant_trans_id);
        if variant == SignatureVariant::Complete {
            out.push_str(fields.merchant_prepare_id?);
        }
        out.push_str(fields.amount);
        out.push_str(fields.action);
        out.push_str(fields.sign_time);
        Some(out)
    }

    /// Hitung digest hex lowercase. Untuk varian complete tanpa prepare id, prepare id dianggap kosong.
    pub fn sign(&self, fields: &SignatureFields<'_>, variant: SignatureVariant) -> String {
        let fields = SignatureFields {
            merchant_prepare_id: fields.merchant_prepare_id.or(Some("")),
            ..*fields
        };
        let input = self.sign_string(&fields, variant).unwrap_or_default();
        hex::encode(Md5::digest(input.as_bytes()))
    }

    /// Verifikasi signature dari Click, false untuk semua mismatch atau field yang hilang
    pub fn verify(&self, fields: &SignatureFields<'_>, variant: SignatureVariant, supplied: &str) -> bool {
        let supplied = supplied.trim();
        if supplied.len() != 32 || !supplied.bytes().all(|b| b.is_ascii_hexdigit()) {
            return false;
        }

        // Complete tanpa prepare id tidak pernah valid
        if variant == SignatureVariant::Complete && fields.merchant_prepare_id.is_none() {
            return false;
        }

        let expected = self.sign(fields, variant);
        let supplied = supplied.to_ascii_lowercase();
        expected.as_bytes().ct_eq(supplied.as_bytes()).into()
    }
}
