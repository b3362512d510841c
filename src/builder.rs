//! Construction of signed, time-bounded payment authorizations.

use crate::clock::Clock;
use crate::errors::{Result, X402Error};
use crate::schemes::SchemeRegistry;
use crate::signer::SignerIdentity;
use crate::types::{PaymentPayload, PaymentRequirements, TransferAuthorization};
use crate::utils::{generate_nonce, parse_address};
use std::sync::Arc;
use std::time::Duration;

/// Builds [`PaymentPayload`]s for requirements picked from a challenge.
///
/// Each authorization gets a fresh random nonce and the window
/// `[now - clock_skew, now + min(ttl, maxTimeoutSeconds))`.
#[derive(Debug, Clone)]
pub struct PaymentAuthorizationBuilder {
    schemes: Arc<SchemeRegistry>,
    ttl: Duration,
    clock_skew: Duration,
}

impl PaymentAuthorizationBuilder {
    /// Default lifetime of an authorization.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Default allowance for clock drift between payer and verifier.
    pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(10);

    /// Creates a builder over the given scheme registry.
    pub fn new(schemes: Arc<SchemeRegistry>) -> Self {
        Self {
            schemes,
            ttl: Self::DEFAULT_TTL,
            clock_skew: Self::DEFAULT_CLOCK_SKEW,
        }
    }

    /// Sets how long authorizations stay valid.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets how far `validAfter` is backdated.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Builds and signs an authorization paying exactly `requirements`.
    ///
    /// Fails loudly with [`X402Error::SignerUnavailable`] when `signer` is `None`;
    /// there is no unsigned fallback.
    pub async fn build(
        &self,
        requirements: &PaymentRequirements,
        signer: Option<&SignerIdentity>,
        clock: &dyn Clock,
    ) -> Result<PaymentPayload> {
        let signer = signer.ok_or(X402Error::SignerUnavailable)?;
        let scheme = self.schemes.require(&requirements.scheme)?;

        if requirements.max_amount_required.is_zero() {
            return Err(X402Error::InvalidAmount("requirements ask for zero".to_string()));
        }

        let lifetime = match requirements.max_timeout_seconds {
            0 => self.ttl.as_secs(),
            max => self.ttl.as_secs().min(max),
        };
        let now = clock.now();
        let valid_after = now.saturating_sub(self.clock_skew.as_secs());
        let valid_before = now.saturating_add(lifetime);
        if valid_after >= valid_before {
            return Err(X402Error::ConfigError(
                "authorization window is empty; ttl and clock skew are both zero".to_string(),
            ));
        }

        let authorization = TransferAuthorization {
            from: signer.address(),
            to: parse_address(&requirements.pay_to)?,
            value: requirements.max_amount_required,
            valid_after,
            valid_before,
            nonce: generate_nonce(),
        };

        tracing::debug!(
            scheme = %requirements.scheme,
            network = %requirements.network,
            amount = %requirements.max_amount_required,
            valid_before = %valid_before,
            "signing payment authorization"
        );
        scheme.sign_payload(requirements, authorization, signer).await
    }
}

impl Default for PaymentAuthorizationBuilder {
    fn default() -> Self {
        Self::new(Arc::new(SchemeRegistry::default()))
    }
}
