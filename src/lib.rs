//! # x402-gate
//!
//! Client and resource-server core of the x402 protocol: HTTP 402 "Payment
//! Required" answered with a signed, single-use, time-bounded payment
//! authorization.
//!
//! ## Features
//!
//! - **Client**: [`client::PaymentInterceptor`] turns a 402 into one paid retry
//! - **Server**: [`server::PaymentGate`] and the [`server::require_payment`] Axum middleware
//! - **Facilitator client**: verification and settlement are delegated to a remote facilitator
//! - **EVM chains**: the `exact` scheme over EIP-3009 `transferWithAuthorization`
//! - **Extensible**: schemes and networks are registry lookups
//!
//! ## Quick Start
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use x402_gate::client::{ClientConfig, PaymentInterceptor};
//! use x402_gate::signer::SignerIdentity;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = SignerIdentity::from_private_key("0xYOUR_PRIVATE_KEY")?;
//! let config = ClientConfig::new()
//!     .with_base_url("https://api.example.com/")?
//!     .with_network("base-sepolia");
//! let client = PaymentInterceptor::new(config, Some(signer));
//!
//! let response = client.get("/weather").await?;
//! println!("Response: {}", response.text().await?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Server Example
//!
//! ```rust,no_run
//! use x402_gate::server::{PaymentConfig, PaymentGate};
//!
//! # async fn example() -> x402_gate::Result<()> {
//! let config = PaymentConfig::new(
//!     "0xYOUR_ADDRESS",
//!     "base-sepolia",
//!     "$0.0001",
//!     "https://x402.org/facilitator",
//! )
//! .allow_volatile_replay_cache(true);
//! // The returned gate already purges expired nonces in the background.
//! let gate = PaymentGate::from_config(&config, "/weather").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Protocol Overview
//!
//! 1. **Client requests resource**: Standard HTTP request
//! 2. **Server responds with 402**: `{ x402Version, accepts: [...] }`
//! 3. **Client signs an authorization**: fresh nonce, bounded validity window
//! 4. **Client retries once with payment**: `X-PAYMENT` header
//! 5. **Server checks locally**: decode, expiry, exact requirements, replay
//! 6. **Server asks the facilitator**: verify then settle, under a timeout
//! 7. **Server responds**: handler output plus `X-PAYMENT-RESPONSE`, or 402 with a
//!    reason code, or 503 if the facilitator could not be reached
//!
//! ## References
//!
//! - [x402 Specification](https://github.com/coinbase/x402)
//! - [EIP-3009](https://eips.ethereum.org/EIPS/eip-3009)
//! - [EIP-712](https://eips.ethereum.org/EIPS/eip-712)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod challenge;
pub mod client;
pub mod clock;
pub mod errors;
pub mod facilitator;
pub mod networks;
pub mod replay;
pub mod schemes;
pub mod server;
pub mod signer;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use builder::PaymentAuthorizationBuilder;
pub use challenge::decode_challenge;
pub use client::{ClientConfig, PaymentInterceptor};
pub use errors::{Result, X402Error};
pub use facilitator::{Facilitator, FacilitatorClient};
pub use replay::{InMemoryNonceStore, NonceStore};
pub use server::{require_payment, PaymentConfig, PaymentGate};
pub use signer::SignerIdentity;
pub use types::{
    PaymentPayload, PaymentRequiredResponse, PaymentRequirements, SettlementReceipt, TokenAmount,
    PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, X402_VERSION,
};
