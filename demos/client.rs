//! Example x402 client.
//!
//! Requests a protected path and pays for it if the server answers 402.
//!
//! Run with:
//! ```bash
//! cargo run --example client -- /x402-check
//! ```
//!
//! Environment variables (a `.env` file is read if present):
//! - X402_PRIVATE_KEY: Private key used to sign payments
//! - X402_BASE_URL: Server to talk to (default: http://localhost:3000)
//! - X402_CHAIN: Preferred network, e.g. base-sepolia

use tracing_subscriber::EnvFilter;
use x402_gate::client::{ClientConfig, PaymentInterceptor};
use x402_gate::signer::SignerIdentity;
use x402_gate::utils::decode_payment_response;
use x402_gate::PAYMENT_RESPONSE_HEADER;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "/x402-check".to_string());

    let mut config = ClientConfig::from_env()?;
    if config.base_url.is_none() {
        config = config.with_base_url("http://localhost:3000")?;
    }
    let signer = SignerIdentity::from_env("X402_PRIVATE_KEY")?;
    match &signer {
        Some(signer) => println!("Paying as {:?}", signer.address()),
        None => println!("X402_PRIVATE_KEY not set; paid requests will fail"),
    }
    let client = PaymentInterceptor::new(config, signer);

    match client.get(&path).await {
        Ok(response) => {
            println!("Response status: {}", response.status());

            if let Some(receipt) = response
                .headers()
                .get(PAYMENT_RESPONSE_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| decode_payment_response(value).ok())
            {
                println!("Payment settled: {} on {}", receipt.transaction, receipt.network);
            }

            let body = response.text().await?;
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", body),
            }
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.reason_code(), e);
            if e.is_retryable_with_fresh_authorization() {
                eprintln!("Retrying with a fresh authorization may succeed.");
            }
            return Err(e.into());
        }
    }

    Ok(())
}
