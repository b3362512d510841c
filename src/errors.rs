//! Error types for the x402-gate library.
//!
//! Every failure on either side of the protocol is an [`X402Error`]. Protocol
//! outcomes (expired, replayed, mismatched, rejected) carry a machine-readable
//! [`reason_code`](X402Error::reason_code) so the paying side can act on them.

use thiserror::Error;

/// Main error type for x402 operations.
#[derive(Error, Debug)]
pub enum X402Error {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during Base64 encoding/decoding
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Error parsing URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// A 402 challenge body or an `X-PAYMENT` header did not match the wire schema
    #[error("Malformed challenge: {0}")]
    MalformedChallenge(String),

    /// None of the offered schemes (or the named scheme) is registered
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Network identifier is not in the network registry
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// A payment was required but no signer is configured
    #[error("No signer configured; refusing to send an unsigned payment")]
    SignerUnavailable,

    /// The authorization's `validBefore` has passed
    #[error("Payment authorization expired")]
    Expired,

    /// The nonce was already accepted for this payer and asset
    #[error("Payment nonce already used")]
    ReplayDetected,

    /// The presented payment does not satisfy the route's requirements
    #[error("Payment does not match requirements: {0}")]
    RequirementsMismatch(String),

    /// The resource server or facilitator explicitly refused the payment
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// The facilitator could not be reached in time; the payment was not judged
    #[error("Facilitator unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The selected requirement costs more than the client is willing to pay
    #[error("Payment of {requested} exceeds configured limit {limit}")]
    AmountExceedsLimit {
        /// Amount asked for by the server, in smallest units
        requested: u128,
        /// Configured client limit, in smallest units
        limit: u128,
    },

    /// Signing failed
    #[error("Signature error: {0}")]
    SignatureError(String),

    /// Request body is a stream and cannot be replayed with a payment attached
    #[error("Request is not cloneable; a streaming body cannot be paid for and resent")]
    RequestNotCloneable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for x402 operations.
pub type Result<T> = std::result::Result<T, X402Error>;

impl X402Error {
    /// Machine-readable reason code placed in the `error` field of a 402 body.
    ///
    /// For [`X402Error::PaymentRejected`] the facilitator's own reason is passed through.
    pub fn reason_code(&self) -> String {
        match self {
            X402Error::MalformedChallenge(_) | X402Error::Base64Error(_) | X402Error::JsonError(_) => {
                "malformed_payment".to_string()
            }
            X402Error::UnsupportedScheme(_) => "unsupported_scheme".to_string(),
            X402Error::UnsupportedNetwork(_) => "unsupported_network".to_string(),
            X402Error::Expired => "expired".to_string(),
            X402Error::ReplayDetected => "replay_detected".to_string(),
            X402Error::RequirementsMismatch(_) => "requirements_mismatch".to_string(),
            X402Error::PaymentRejected(reason) => reason.clone(),
            X402Error::ServiceUnavailable(_) => "service_unavailable".to_string(),
            X402Error::SignerUnavailable => "signer_unavailable".to_string(),
            X402Error::InvalidAddress(_) => "invalid_address".to_string(),
            X402Error::InvalidAmount(_) => "invalid_amount".to_string(),
            _ => "internal_error".to_string(),
        }
    }

    /// HTTP status the resource server answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            X402Error::ServiceUnavailable(_) => 503,
            X402Error::ConfigError(_) | X402Error::HttpError(_) | X402Error::UrlParseError(_) => 500,
            _ => 402,
        }
    }

    /// Whether the payer should build a fresh authorization and try again.
    ///
    /// `Expired` and `ReplayDetected` are fixed by a new nonce and window;
    /// mismatches and facilitator rejections (e.g. insufficient funds) are not.
    /// A client sees the gate's verdict as `PaymentRejected` carrying the
    /// reason code, so those codes count too.
    pub fn is_retryable_with_fresh_authorization(&self) -> bool {
        match self {
            X402Error::Expired | X402Error::ReplayDetected => true,
            X402Error::PaymentRejected(reason) => reason == "expired" || reason == "replay_detected",
            _ => false,
        }
    }
}

impl From<ethers::signers::WalletError> for X402Error {
    fn from(err: ethers::signers::WalletError) -> Self {
        X402Error::SignatureError(err.to_string())
    }
}
