//! Decoding of 402 Payment Required challenges.

use crate::errors::{Result, X402Error};
use crate::schemes::SchemeRegistry;
use crate::types::{PaymentRequiredResponse, PaymentRequirements};

/// Parses a 402 response into the requirement variants this client can pay.
///
/// Returns every acceptable variant in the server's order so the caller can
/// negotiate; fails with [`X402Error::MalformedChallenge`] when the body does
/// not follow the challenge schema and [`X402Error::UnsupportedScheme`] when
/// nothing offered is registered.
pub fn decode_challenge(
    status: u16,
    body: &[u8],
    schemes: &SchemeRegistry,
) -> Result<Vec<PaymentRequirements>> {
    if status != 402 {
        return Err(X402Error::MalformedChallenge(format!(
            "expected status 402, got {}",
            status
        )));
    }

    let challenge: PaymentRequiredResponse = serde_json::from_slice(body)
        .map_err(|e| X402Error::MalformedChallenge(format!("invalid challenge body: {}", e)))?;

    if challenge.accepts.is_empty() {
        return Err(X402Error::MalformedChallenge(
            "challenge offers no payment requirements".to_string(),
        ));
    }
    if let Some(free) = challenge.accepts.iter().find(|r| r.max_amount_required.is_zero()) {
        return Err(X402Error::MalformedChallenge(format!(
            "requirement for {} asks for a zero amount",
            free.resource
        )));
    }

    let offered: Vec<String> = challenge
        .accepts
        .iter()
        .map(|r| format!("{}/{}", r.scheme, r.network))
        .collect();

    let supported: Vec<PaymentRequirements> = challenge
        .accepts
        .into_iter()
        .filter(|r| schemes.supports(r))
        .collect();

    if supported.is_empty() {
        return Err(X402Error::UnsupportedScheme(offered.join(", ")));
    }

    tracing::debug!(
        offered = offered.len(),
        supported = supported.len(),
        "decoded payment challenge"
    );
    Ok(supported)
}
