//! Utility functions for x402 operations.
//!
//! Header encoding, address parsing, nonce generation and price conversion
//! shared by the client and server sides.

use crate::errors::{Result, X402Error};
use crate::types::{PaymentPayload, PaymentResponse, TokenAmount, UnixTimestamp, X402_VERSION};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::types::{Address, H256};
use std::str::FromStr;

/// Encodes a PaymentPayload as Base64 JSON for the `X-PAYMENT` header.
///
/// Encoding is deterministic, so decoding and re-encoding yields the same bytes.
pub fn encode_payment_header(payload: &PaymentPayload) -> Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON PaymentPayload from the `X-PAYMENT` header.
///
/// Any failure, including a version other than [`X402_VERSION`] or an empty
/// validity window, is reported as [`X402Error::MalformedChallenge`].
pub fn decode_payment_header(encoded: &str) -> Result<PaymentPayload> {
    let decoded = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|e| X402Error::MalformedChallenge(format!("payment header is not base64: {}", e)))?;
    let payload: PaymentPayload = serde_json::from_slice(&decoded)
        .map_err(|e| X402Error::MalformedChallenge(format!("payment header is not a payment payload: {}", e)))?;

    if payload.x402_version != X402_VERSION {
        return Err(X402Error::MalformedChallenge(format!(
            "unsupported x402Version {}",
            payload.x402_version
        )));
    }
    let authorization = &payload.payload.authorization;
    if authorization.valid_after >= authorization.valid_before {
        return Err(X402Error::MalformedChallenge(
            "validAfter must be earlier than validBefore".to_string(),
        ));
    }
    Ok(payload)
}

/// Encodes a settlement [`PaymentResponse`] for the `X-PAYMENT-RESPONSE` header.
pub fn encode_payment_response(response: &PaymentResponse) -> Result<String> {
    let json = serde_json::to_string(response)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes an `X-PAYMENT-RESPONSE` header value.
pub fn decode_payment_response(encoded: &str) -> Result<PaymentResponse> {
    let decoded = BASE64.decode(encoded.trim().as_bytes())?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Validates and parses an Ethereum address.
///
/// # Examples
///
/// ```
/// use x402_gate::utils::parse_address;
///
/// assert!(parse_address("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb").is_ok());
/// assert!(parse_address("invalid").is_err());
/// ```
pub fn parse_address(addr: &str) -> Result<Address> {
    Address::from_str(addr).map_err(|e| X402Error::InvalidAddress(format!("{}: {}", addr, e)))
}

/// Generates a random 32-byte nonce for EIP-3009 authorization.
pub fn generate_nonce() -> H256 {
    use rand::Rng;
    let nonce: [u8; 32] = rand::thread_rng().gen();
    H256::from(nonce)
}

/// Converts a decimal price such as `"0.0001"` or `"$0.01"` into smallest token units.
///
/// Works on the decimal string directly; a price with more fractional digits
/// than the token supports is an error rather than a silent rounding.
///
/// # Examples
///
/// ```
/// use x402_gate::utils::money_to_token_amount;
///
/// assert_eq!(money_to_token_amount("$0.0001", 6).unwrap().get(), 100);
/// assert_eq!(money_to_token_amount("1.5", 6).unwrap().get(), 1_500_000);
/// ```
pub fn money_to_token_amount(price: &str, decimals: u8) -> Result<TokenAmount> {
    let invalid = |why: &str| X402Error::InvalidAmount(format!("'{}': {}", price, why));

    let trimmed = price.trim();
    let digits = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("empty price"));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a non-negative decimal number"));
    }

    let frac = frac.trim_end_matches('0');
    let decimals = usize::from(decimals);
    if frac.len() > decimals {
        return Err(invalid("more precision than the token supports"));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| invalid("too many decimals"))?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid("overflow"))?
    };
    let frac_units = if decimals == 0 {
        0
    } else {
        format!("{:0<width$}", frac, width = decimals)
            .parse::<u128>()
            .map_err(|_| invalid("overflow"))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(frac_units))
        .map(TokenAmount)
        .ok_or_else(|| invalid("overflow"))
}

/// Gets the current Unix timestamp in seconds.
pub fn current_timestamp() -> UnixTimestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    UnixTimestamp(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentAuthorization, RequirementsRef, TransferAuthorization};
    use ethers::types::Bytes;

    fn payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: X402_VERSION,
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            accepted: RequirementsRef {
                resource: "/check".to_string(),
                asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            },
            payload: PaymentAuthorization {
                signature: Bytes::from(vec![7u8; 65]),
                authorization: TransferAuthorization {
                    from: Address::repeat_byte(0x11),
                    to: Address::repeat_byte(0x22),
                    value: TokenAmount(100),
                    valid_after: UnixTimestamp(1_700_000_000),
                    valid_before: UnixTimestamp(1_700_000_060),
                    nonce: generate_nonce(),
                },
            },
        }
    }

    #[test]
    fn test_encode_decode_payment_header() {
        let original = payload();
        let encoded = encode_payment_header(&original).unwrap();
        let decoded = decode_payment_header(&encoded).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(encode_payment_header(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_payment_header("%%%not-base64%%%"),
            Err(X402Error::MalformedChallenge(_))
        ));
        let not_a_payload = BASE64.encode(b"{\"hello\":\"world\"}");
        assert!(matches!(
            decode_payment_header(&not_a_payload),
            Err(X402Error::MalformedChallenge(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_version_and_empty_window() {
        let mut wrong_version = payload();
        wrong_version.x402_version = 2;
        let encoded = encode_payment_header(&wrong_version).unwrap();
        assert!(matches!(decode_payment_header(&encoded), Err(X402Error::MalformedChallenge(_))));

        let mut empty_window = payload();
        empty_window.payload.authorization.valid_before = empty_window.payload.authorization.valid_after;
        let encoded = encode_payment_header(&empty_window).unwrap();
        assert!(matches!(decode_payment_header(&encoded), Err(X402Error::MalformedChallenge(_))));
    }

    #[test]
    fn test_payment_response_header() {
        let response = PaymentResponse {
            success: true,
            transaction: "0xfeed".to_string(),
            network: "base-sepolia".to_string(),
            payer: Address::repeat_byte(0x11),
            settled_at: None,
        };
        let encoded = encode_payment_response(&response).unwrap();
        assert_eq!(decode_payment_response(&encoded).unwrap(), response);
        assert!(decode_payment_response("%%%").is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb").unwrap();
        let addr2 = parse_address("742d35Cc6634C0532925a3b844Bc9e7595f0bEbb").unwrap();
        assert_eq!(addr, addr2);
        assert!(parse_address("invalid").is_err());
    }

    #[test]
    fn test_generate_nonce() {
        let nonces: std::collections::HashSet<H256> = (0..256).map(|_| generate_nonce()).collect();
        assert_eq!(nonces.len(), 256);
    }

    #[test]
    fn test_money_to_token_amount() {
        assert_eq!(money_to_token_amount("0.0001", 6).unwrap(), TokenAmount(100));
        assert_eq!(money_to_token_amount("$0.01", 6).unwrap(), TokenAmount(10_000));
        assert_eq!(money_to_token_amount("1", 6).unwrap(), TokenAmount(1_000_000));
        assert_eq!(money_to_token_amount(".5", 6).unwrap(), TokenAmount(500_000));
        assert_eq!(money_to_token_amount("0.010000000", 6).unwrap(), TokenAmount(10_000));
        assert_eq!(
            money_to_token_amount("0.01", 18).unwrap(),
            TokenAmount(10_000_000_000_000_000)
        );
    }

    #[test]
    fn test_money_to_token_amount_rejects_bad_input() {
        assert!(money_to_token_amount("0.0000001", 6).is_err());
        assert!(money_to_token_amount("-1", 6).is_err());
        assert!(money_to_token_amount("1e3", 6).is_err());
        assert!(money_to_token_amount("$", 6).is_err());
        assert!(money_to_token_amount("", 6).is_err());
    }

    #[test]
    fn test_current_timestamp() {
        let ts = current_timestamp();
        assert!(ts.as_secs() > 1_600_000_000);
    }
}
