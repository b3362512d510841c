//! Example x402 resource server using Axum.
//!
//! `/x402-check` is protected by the payment gate. `/api/x402-pay` pays for
//! `/x402-check` on the caller's behalf with the server's own signer, which
//! is handy for trying the flow from a browser or curl.
//!
//! Run with:
//! ```bash
//! cargo run --example server
//! ```
//!
//! Environment variables (a `.env` file is read if present):
//! - PAY_TO: Address to receive payments (required)
//! - X402_NETWORK: Network to charge on (default: base-sepolia)
//! - X402_PRICE: Price per request (default: $0.0001)
//! - FACILITATOR_URL: Facilitator base URL (default: https://x402.org/facilitator)
//! - FACILITATOR_TIMEOUT_SECS: Bound on one facilitator exchange (default: 10)
//! - X402_ALLOW_VOLATILE_REPLAY_CACHE: Must be `true`; this demo keeps nonces in memory
//! - X402_PRIVATE_KEY: Signer used by `/api/x402-pay`
//! - PORT: Server port (default: 3000)

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use x402_gate::client::{ClientConfig, PaymentInterceptor};
use x402_gate::server::{require_payment, PaymentConfig, PaymentGate};
use x402_gate::signer::SignerIdentity;
use x402_gate::utils::decode_payment_response;
use x402_gate::{X402Error, PAYMENT_RESPONSE_HEADER};

const CHECK_PATH: &str = "/x402-check";

struct AppState {
    payer: PaymentInterceptor,
}

/// Protected endpoint; only reached once the gate has settled a payment.
async fn check_handler() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "message": "Payment verified",
    }))
}

/// Pays for `/x402-check` with the server's signer and relays the outcome.
async fn pay_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let response = state.payer.get(CHECK_PATH).await?;
    let status = response.status();
    let receipt = response
        .headers()
        .get(PAYMENT_RESPONSE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| decode_payment_response(value).ok());
    let body: serde_json::Value = response.json().await.map_err(X402Error::from)?;

    Ok((
        status,
        Json(json!({
            "status": status.as_u16(),
            "payment": receipt,
            "body": body,
        })),
    )
        .into_response())
}

/// Health check endpoint (no payment required).
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "protocol": "x402",
        "version": 1,
    }))
}

/// Root endpoint with information.
async fn root_handler(State(gate): State<Arc<PaymentGate>>) -> impl IntoResponse {
    let requirements = gate.requirements();
    Json(json!({
        "message": "x402 Example Server",
        "endpoints": {
            "/x402-check": format!(
                "Requires {} smallest units of {} on {}",
                requirements.max_amount_required, requirements.asset, requirements.network
            ),
            "/api/x402-pay": "POST; pays for the check with the server's signer",
            "/health": "Health check (free)"
        },
        "protocol": "x402",
        "version": 1,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,x402_gate=debug")),
        )
        .init();

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()?;

    let config = PaymentConfig::from_env()?
        .with_description("Access check")
        .with_eviction_interval(Duration::from_secs(30));
    let gate = PaymentGate::from_config(&config, CHECK_PATH).await?;

    let mut client_config = ClientConfig::from_env()?;
    if client_config.base_url.is_none() {
        client_config = client_config.with_base_url(&format!("http://localhost:{}", port))?;
    }
    let payer = PaymentInterceptor::new(client_config, SignerIdentity::from_env("X402_PRIVATE_KEY")?);
    let state = Arc::new(AppState { payer });

    tracing::info!(
        pay_to = %config.pay_to,
        network = %config.network,
        facilitator = %config.facilitator_url,
        port,
        "starting x402 example server"
    );

    let app = Router::new()
        .route(CHECK_PATH, get(check_handler))
        .route_layer(middleware::from_fn_with_state(gate.clone(), require_payment))
        .route("/", get(root_handler).with_state(gate))
        .route("/health", get(health_handler))
        .route("/api/x402-pay", post(pay_handler).with_state(state))
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

struct AppError(X402Error);

impl From<X402Error> for AppError {
    fn from(err: X402Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({
                "error": self.0.reason_code(),
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable_with_fresh_authorization(),
            })),
        )
            .into_response()
    }
}
