// API Routes untuk Payment Service: callback Click publik, endpoint internal pakai JWT

use crate::config::AppState;
use crate::handlers::payment_handler;
use crate::middleware::auth::jwt_auth_middleware;
use axum::{
    extract::Request,
    http::{header, header::HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

// OpenAPI Documentation untuk Payment Service
#[derive(OpenApi)]
#[openapi(
    paths(
        payment_handler::click_prepare,
        payment_handler::click_complete,
        payment_handler::create_payment,
        payment_handler::check_payment_status,
        payment_handler::update_payment_status,
        payment_handler::health_check,
        payment_handler::get_service_info,
    ),
    components(
        schemas(
            crate::domain::click::ClickRequest,
            crate::domain::click::PrepareResponse,
            crate::domain::click::CompleteResponse,
            crate::domain::click::CreatePaymentRequest,
            crate::domain::click::CreatePaymentResponse,
            crate::domain::click::CheckoutLinks,
            crate::domain::registration::PaymentStatusView,
            crate::domain::registration::PaymentInfo,
            crate::domain::registration::PaymentStatus,
            crate::domain::registration::RegistrationStatus,
            crate::domain::registration::UpdateStatusRequest,
            crate::config::HealthStatus
        )
    ),
    tags(
        (name = "Click", description = "Click prepare/complete callbacks"),
        (name = "Payment Service", description = "Payment status and checkout for IELTS registrations")
    ),
    info(
        title = "Payment Service API",
        description = "Click payment gateway for IELTS exam registrations\n\n## Features\n\n- 💳 Click prepare/complete handshake\n- 🔏 MD5 signature verification\n- 🌐 Origin allow-list in production\n- ⏰ Automatic expiry of unconfirmed payments\n\nClick callbacks always answer HTTP 200; the outcome is in the `error` field.",
        version = "1.0.0"
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

// Security scheme modifier untuk Bearer JWT authentication
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}

// Security headers middleware
async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; connect-src 'self'; frame-ancestors 'none';",
        ),
    );
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("strict-origin-when-cross-origin"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    response
}

// CORS hanya untuk frontend, Click memanggil server-to-server
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .allow_credentials(false)
        .max_age(Duration::from_secs(86400));

    match frontend_url.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("FRONTEND_URL is not a valid origin, CORS disabled: {}", frontend_url);
            cors
        }
    }
}

// Buat router Payment Service
pub fn create_routes(state: AppState) -> Router {
    if state.config.is_production() {
        tracing::warn!("Payment Service running in PRODUCTION mode");
    } else {
        tracing::info!("Payment Service running in DEVELOPMENT mode");
    }

    let openapi = ApiDoc::openapi();
    let timeout = TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30));

    // Public routes - tanpa JWT authentication
    let public_routes = Router::new()
        .route("/health", get(payment_handler::health_check))
        .route("/info", get(payment_handler::get_service_info))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi))
        .with_state(state.clone())
        .layer(timeout.clone());

    // Callback Click di luar TimeoutLayer, deadline store ada di ClickService
    let api_routes = build_click_routes(state.clone()).merge(
        build_status_routes(state.clone())
            .merge(build_protected_routes(state.clone()))
            .layer(timeout),
    );

    public_routes
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.frontend_url)),
        )
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

// Callback Click, autentikasi lewat signature bukan JWT
fn build_click_routes(state: AppState) -> Router {
    Router::new()
        .route("/payments/click/prepare", post(payment_handler::click_prepare))
        .route("/payments/click/complete", post(payment_handler::click_complete))
        .with_state(state)
}

// Status check untuk user panel
fn build_status_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/payments/status/{registration_id}",
            get(payment_handler::check_payment_status),
        )
        .with_state(state)
}

// Endpoint internal dengan JWT authentication
fn build_protected_routes(state: AppState) -> Router {
    Router::new()
        .route("/payments/click/create-payment", post(payment_handler::create_payment))
        .route("/payments/update-status", post(payment_handler::update_payment_status))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_middleware,
        ))
        .with_state(state)
}
