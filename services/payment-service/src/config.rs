// Payment Service Configuration
use crate::handlers::click_service::ClickService;
use crate::repositories::registration_repo::{PgRegistrationRepository, RegistrationStore};
use sqlx::{postgres::PgConnectOptions, postgres::PgPoolOptions, PgPool};
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CLICK_IPS: &str = "185.8.212.184,185.8.212.185,185.8.212.186";

/// Batas atas window expiry prepare (24 jam)
const MAX_PAYMENT_TIMEOUT_MINUTES: i64 = 1440;

/// Konfigurasi protokol Click, di-inject ke signer, origin validator, dan handlers
#[derive(Debug, Clone)]
pub struct ClickConfig {
    pub service_id: i64,
    pub merchant_id: i64,
    pub merchant_user_id: i64,
    pub secret_key: String,
    pub default_amount: i64,
    pub allowed_ips: Vec<IpAddr>,
    pub payment_timeout_minutes: i64,
    pub transaction_prefix: String,
    pub is_production: bool,
    /// Batas waktu satu panggilan store di jalur Click
    pub store_timeout: Duration,
}

impl ClickConfig {
    /// None kalau nilai menit di luar range `chrono::Duration`
    pub fn payment_timeout(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.payment_timeout_minutes)
    }

    /// Ambil registration id dari merchant_trans_id, prefix checkout dibuang kalau ada
    pub fn registration_id<'a>(&self, merchant_trans_id: &'a str) -> &'a str {
        let trimmed = merchant_trans_id.trim();
        if self.transaction_prefix.is_empty() {
            return trimmed;
        }
        trimmed
            .strip_prefix(self.transaction_prefix.as_str())
            .unwrap_or(trimmed)
    }

    /// transaction_param yang dipakai di checkout link
    pub fn transaction_param(&self, registration_id: &str) -> String {
        format!("{}{}", self.transaction_prefix, registration_id)
    }
}

// Konfigurasi aplikasi dari environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub jwt_secret: String,
    pub frontend_url: String,
    pub sweep_interval_secs: u64,
    pub db_acquire_timeout_secs: u64,
    pub db_statement_timeout_secs: u64,
    pub app_version: String,
    pub click: ClickConfig,
}

fn required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{} harus diset di environment", key))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} tidak valid: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn required_parsed<T: FromStr>(key: &str) -> Result<T, String> {
    let raw = required(key)?;
    raw.trim()
        .parse()
        .map_err(|_| format!("{} tidak valid: {}", key, raw))
}

/// Window expiry harus positif, representable, dan paling lama 24 jam
pub fn validate_payment_timeout(minutes: i64) -> Result<i64, String> {
    if minutes <= 0 || minutes > MAX_PAYMENT_TIMEOUT_MINUTES {
        return Err(format!(
            "PAYMENT_TIMEOUT_MINUTES harus antara 1 dan {}: {}",
            MAX_PAYMENT_TIMEOUT_MINUTES, minutes
        ));
    }
    chrono::Duration::try_minutes(minutes)
        .map(|_| minutes)
        .ok_or_else(|| format!("PAYMENT_TIMEOUT_MINUTES tidak valid: {}", minutes))
}

/// Parse daftar IP dipisah koma
pub fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>()
                .map_err(|_| format!("CLICK_ALLOWED_IPS berisi IP tidak valid: {}", s))
        })
        .collect()
}

impl AppConfig {
    // Load konfigurasi dari environment dengan validasi
    pub fn from_env() -> Result<Self, String> {
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let environment = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        let is_production = environment == "production";

        if is_production && jwt_secret.contains("change-this") {
            return Err("JWT_SECRET masih default! Ganti untuk production".to_string());
        }

        let secret_key = required("CLICK_SECRET_KEY")?;
        if secret_key.trim().is_empty() {
            return Err("CLICK_SECRET_KEY tidak boleh kosong".to_string());
        }

        let default_amount = match env::var("DEFAULT_PAYMENT_AMOUNT") {
            Ok(_) => parsed("DEFAULT_PAYMENT_AMOUNT", 2000)?,
            Err(_) => parsed("TEST_AMOUNT", 2000)?,
        };

        let payment_timeout_minutes = validate_payment_timeout(parsed("PAYMENT_TIMEOUT_MINUTES", 15)?)?;

        let db_statement_timeout_secs: u64 = parsed("DB_STATEMENT_TIMEOUT_SECS", 10)?;
        if db_statement_timeout_secs == 0 {
            return Err("DB_STATEMENT_TIMEOUT_SECS harus lebih dari 0".to_string());
        }

        let sweep_interval_secs: u64 = parsed("PAYMENT_SWEEP_INTERVAL_SECS", 300)?;
        if sweep_interval_secs == 0 {
            return Err("PAYMENT_SWEEP_INTERVAL_SECS harus lebih dari 0".to_string());
        }

        let allowed_ips = parse_ip_list(
            &env::var("CLICK_ALLOWED_IPS").unwrap_or_else(|_| DEFAULT_CLICK_IPS.to_string()),
        )?;

        let click = ClickConfig {
            service_id: required_parsed("CLICK_SERVICE_ID")?,
            merchant_id: required_parsed("CLICK_MERCHANT_ID")?,
            merchant_user_id: required_parsed("CLICK_MERCHANT_USER_ID")?,
            secret_key,
            default_amount,
            allowed_ips,
            payment_timeout_minutes,
            transaction_prefix: env::var("CLICK_TRANSACTION_PREFIX")
                .unwrap_or_else(|_| "ielts_".to_string()),
            is_production,
            store_timeout: Duration::from_secs(db_statement_timeout_secs),
        };

        Ok(AppConfig {
            database_url,
            server_host: env::var("PAYMENT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parsed("PAYMENT_SERVICE_PORT", 5000)?,
            environment,
            jwt_secret,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            sweep_interval_secs,
            db_acquire_timeout_secs: parsed("DB_ACQUIRE_TIMEOUT_SECS", 10)?,
            db_statement_timeout_secs,
            app_version: env::var("APP_VERSION").unwrap_or_else(|_| "1.0.0".to_string()),
            click,
        })
    }

    // Helper cek production mode
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn host(&self) -> &str {
        &self.server_host
    }

    pub fn port(&self) -> u16 {
        self.server_port
    }
}

// Inisialisasi database connection pool
pub async fn init_db_pool(
    database_url: &str,
    acquire_timeout_secs: u64,
    statement_timeout_secs: u64,
) -> Result<PgPool, sqlx::Error> {
    tracing::info!("🔌 Initializing Payment Service database connection...");

    let options = PgConnectOptions::from_str(database_url)?
        .statement_cache_capacity(0)
        .options([("statement_timeout", format!("{}s", statement_timeout_secs))]);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;

    tracing::info!("✅ Payment Service database pool initialized");
    Ok(pool)
}

// Application state yang di-share ke semua handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn RegistrationStore>,
    pub click: Arc<ClickService>,
}

impl axum::extract::FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl AppState {
    // Inisialisasi application state dengan Postgres
    pub async fn new(config: AppConfig) -> Result<Self, String> {
        let db = init_db_pool(
            &config.database_url,
            config.db_acquire_timeout_secs,
            config.db_statement_timeout_secs,
        )
            .await
            .map_err(|e| format!("Failed to init database: {}", e))?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(|e| format!("Failed to run migrations: {}", e))?;

        let store: Arc<dyn RegistrationStore> = Arc::new(PgRegistrationRepository::new(db));
        Ok(Self::with_store(config, store))
    }

    /// Build state dari store yang sudah ada
    pub fn with_store(config: AppConfig, store: Arc<dyn RegistrationStore>) -> Self {
        let click = Arc::new(ClickService::new(config.click.clone(), store.clone()));
        AppState { config, store, click }
    }

    // Inisialisasi application state dari environment
    pub async fn from_env() -> Result<Self, String> {
        let config = AppConfig::from_env()?;
        Self::new(config).await
    }

    // Health check semua dependencies
    pub async fn health_check(&self) -> HealthStatus {
        let db_healthy = self.store.ping().await;

        HealthStatus {
            database: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
            overall: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        }
    }
}

// Response untuk health check endpoint
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct HealthStatus {
    pub database: String,
    pub overall: String,
}
