//! Core type definitions for the x402 protocol.
//!
//! This module contains the wire structures exchanged between the paying client,
//! the resource server and the facilitator: the 402 challenge body, payment
//! requirements, the `X-PAYMENT` payload, facilitator requests/responses and the
//! settlement receipt.

use crate::errors::{Result, X402Error};
use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Version of the x402 protocol.
pub const X402_VERSION: u32 = 1;

/// Request header carrying the base64 encoded [`PaymentPayload`].
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the base64 encoded [`PaymentResponse`].
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// An amount in the token's smallest unit.
///
/// Carried on the wire as a decimal string so that uint256-style values survive
/// JSON; never represented as a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    /// Returns the raw amount.
    pub fn get(&self) -> u128 {
        self.0
    }

    /// Whether the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u128> for TokenAmount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<TokenAmount> for ethers::types::U256 {
    fn from(value: TokenAmount) -> Self {
        ethers::types::U256::from(value.0)
    }
}

impl FromStr for TokenAmount {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u128>()
            .map(Self)
            .map_err(|e| X402Error::InvalidAmount(format!("'{}': {}", s, e)))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Seconds since the Unix epoch, carried on the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    /// Returns the timestamp in seconds.
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Moves the timestamp back, stopping at the epoch.
    pub fn saturating_sub(&self, secs: u64) -> Self {
        Self(self.0.saturating_sub(secs))
    }

    /// Moves the timestamp forward.
    pub fn saturating_add(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map(Self).map_err(serde::de::Error::custom)
    }
}

/// Response returned by a server when payment is required (HTTP 402).
///
/// Contains the list of accepted payment requirements that the client can choose from.
///
/// # Examples
///
/// ```
/// use x402_gate::types::PaymentRequiredResponse;
///
/// let response = PaymentRequiredResponse {
///     x402_version: 1,
///     accepts: vec![],
///     error: None,
/// };
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentRequiredResponse {
    /// Protocol version (currently 1)
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// List of accepted payment requirements
    pub accepts: Vec<PaymentRequirements>,

    /// Machine-readable reason the previous payment (if any) was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Describes the payment requirements for a specific resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme (e.g., "exact")
    pub scheme: String,

    /// Network identifier (e.g., "base", "base-sepolia")
    pub network: String,

    /// Amount in the asset's smallest unit
    pub max_amount_required: TokenAmount,

    /// The resource URL or identifier
    pub resource: String,

    /// Human-readable description of what the payment is for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// JSON schema describing the output format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Recipient address
    pub pay_to: String,

    /// Maximum time in seconds that a payment for this resource stays valid
    #[serde(default)]
    pub max_timeout_seconds: u64,

    /// Token contract address (e.g., USDC contract address)
    pub asset: String,

    /// Scheme-specific extra data (e.g., {"name": "USDC", "version": "2"} for EIP-3009)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl PaymentRequirements {
    /// Reads a string field from `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// EIP-3009 `transferWithAuthorization` parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    /// Address of the payer (token holder)
    pub from: Address,

    /// Address of the payee
    pub to: Address,

    /// Amount to transfer
    pub value: TokenAmount,

    /// Timestamp after which the authorization is valid
    pub valid_after: UnixTimestamp,

    /// Timestamp before which the authorization is valid
    pub valid_before: UnixTimestamp,

    /// Unique 32 byte nonce for replay protection
    pub nonce: H256,
}

/// A signed [`TransferAuthorization`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuthorization {
    /// EIP-712 signature (r, s, v concatenated)
    pub signature: Bytes,

    /// The signed fields
    pub authorization: TransferAuthorization,
}

/// Which requirements variant a payment was built for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RequirementsRef {
    /// Resource the payment was built for
    pub resource: String,

    /// Asset the payment was built for
    pub asset: String,
}

/// Payment payload sent by the client in the `X-PAYMENT` header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentPayload {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// Payment scheme used
    pub scheme: String,

    /// Network identifier
    pub network: String,

    /// Reference to the requirements variant this payment satisfies
    pub accepted: RequirementsRef,

    /// The signed authorization
    pub payload: PaymentAuthorization,
}

impl PaymentPayload {
    /// The payer's address.
    pub fn payer(&self) -> Address {
        self.payload.authorization.from
    }

    /// Encodes this payload for the `X-PAYMENT` header.
    pub fn encode(&self) -> Result<String> {
        crate::utils::encode_payment_header(self)
    }

    /// Decodes an `X-PAYMENT` header value.
    pub fn decode(encoded: &str) -> Result<Self> {
        crate::utils::decode_payment_header(encoded)
    }
}

/// Body of both `POST /verify` and `POST /settle`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// The payment as presented by the client
    pub payment_payload: PaymentPayload,

    /// The requirements the resource server expects
    pub payment_requirements: PaymentRequirements,
}

/// Response from the facilitator's `/verify` endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payment payload is valid
    pub is_valid: bool,

    /// Reason if invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,

    /// Payer as seen by the facilitator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Response from the facilitator's `/settle` endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether settlement succeeded
    pub success: bool,

    /// Reason if settlement failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Settlement reference, usually a transaction hash
    #[serde(
        rename = "transaction",
        alias = "settlementRef",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub settlement_ref: Option<String>,

    /// Network the payment settled on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Payer as seen by the facilitator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Outcome of a facilitator round trip. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Whether the payment was verified and settled
    pub success: bool,

    /// Settlement reference (transaction id) when successful
    pub settlement_ref: Option<String>,

    /// Facilitator's reason when the payment was refused
    pub rejection: Option<String>,

    /// Network the payment was made on
    pub network: String,

    /// Payer of the authorization
    pub payer: Address,
}

impl SettlementReceipt {
    /// A successful settlement.
    pub fn settled(settlement_ref: impl Into<String>, network: impl Into<String>, payer: Address) -> Self {
        Self {
            success: true,
            settlement_ref: Some(settlement_ref.into()),
            rejection: None,
            network: network.into(),
            payer,
        }
    }

    /// An explicit refusal.
    pub fn rejected(reason: impl Into<String>, network: impl Into<String>, payer: Address) -> Self {
        Self {
            success: false,
            settlement_ref: None,
            rejection: Some(reason.into()),
            network: network.into(),
            payer,
        }
    }

    /// Turns a refusal into [`X402Error::PaymentRejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let reason = self.rejection.unwrap_or_else(|| "payment_rejected".to_string());
            Err(X402Error::PaymentRejected(reason))
        }
    }

    /// Builds the `X-PAYMENT-RESPONSE` body for this receipt.
    pub fn to_payment_response(&self) -> PaymentResponse {
        PaymentResponse {
            success: self.success,
            transaction: self.settlement_ref.clone().unwrap_or_default(),
            network: self.network.clone(),
            payer: self.payer,
            settled_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Information returned in the `X-PAYMENT-RESPONSE` header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Whether the payment settled
    pub success: bool,

    /// Settlement reference (transaction hash)
    pub transaction: String,

    /// Network the payment settled on
    pub network: String,

    /// Payer address
    pub payer: Address,

    /// RFC 3339 timestamp of settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<String>,
}

/// A supported payment kind (scheme + network combination).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SupportedKind {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// Payment scheme
    pub scheme: String,

    /// Network identifier
    pub network: String,
}

/// Response from the facilitator's `/supported` endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SupportedResponse {
    /// List of supported payment kinds
    pub kinds: Vec<SupportedKind>,
}
