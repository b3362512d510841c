//! Server-side functionality for the x402 protocol.
//!
//! [`PaymentConfig`] describes what a route costs, [`PaymentGate`] enforces
//! it, and [`require_payment`] plugs the gate into an Axum router:
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use std::sync::Arc;
//! use x402_gate::server::{require_payment, PaymentConfig, PaymentGate};
//!
//! # async fn run() -> x402_gate::Result<()> {
//! let config = PaymentConfig::new(
//!     "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb",
//!     "base-sepolia",
//!     "$0.0001",
//!     "https://x402.org/facilitator",
//! )
//! .allow_volatile_replay_cache(true);
//! // Also starts purging expired nonces every `config.eviction_interval`.
//! let gate: Arc<PaymentGate> = PaymentGate::from_config(&config, "/x402-check").await?;
//!
//! let app: Router = Router::new()
//!     .route("/x402-check", get(|| async { "paid" }))
//!     .layer(middleware::from_fn_with_state(gate, require_payment));
//! # Ok(())
//! # }
//! ```
//!
//! Checks run in a fixed order and the facilitator is only asked once every
//! local check has passed: decode, expiry, exact requirements match, nonce
//! replay. The presented window may not outlast the route's `maxTimeoutSeconds`.
//! A facilitator outage is answered with 503 and never confused with a
//! rejected payment.

use crate::clock::{Clock, SystemClock};
use crate::errors::{Result, X402Error};
use crate::facilitator::{Facilitator, FacilitatorClient};
use crate::networks::NetworkRegistry;
use crate::builder::PaymentAuthorizationBuilder;
use crate::replay::{spawn_eviction, InMemoryNonceStore, NonceStore, ReplayKey};
use crate::schemes::{ExactEvm, SchemeRegistry};
use crate::types::{
    PaymentRequiredResponse, PaymentRequirements, SettlementReceipt, TokenAmount, UnixTimestamp,
    PAYMENT_HEADER, X402_VERSION,
};
use crate::utils::{decode_payment_header, encode_payment_response, money_to_token_amount, parse_address};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How a route is priced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Price {
    /// A decimal amount of the asset, e.g. `"0.0001"` or `"$0.0001"`
    Money(String),
    /// An exact amount in the asset's smallest unit
    TokenAmount(TokenAmount),
}

impl From<&str> for Price {
    fn from(price: &str) -> Self {
        Price::Money(price.to_string())
    }
}

impl From<String> for Price {
    fn from(price: String) -> Self {
        Price::Money(price)
    }
}

impl From<TokenAmount> for Price {
    fn from(amount: TokenAmount) -> Self {
        Price::TokenAmount(amount)
    }
}

/// Configuration for payment requirements on a server endpoint.
#[derive(Clone, Debug)]
pub struct PaymentConfig {
    /// Address to receive payments
    pub pay_to: String,

    /// Network identifier (e.g., "base-sepolia")
    pub network: String,

    /// Payment scheme (e.g., "exact")
    pub scheme: String,

    /// Price of one request
    pub price: Price,

    /// Token contract address; the network's USDC deployment when unset
    pub asset: Option<String>,

    /// Token decimals; looked up from the known deployment when unset
    pub decimals: Option<u8>,

    /// Description of what the payment is for
    pub description: String,

    /// MIME type of the protected resource
    pub mime_type: Option<String>,

    /// Facilitator URL for verification and settlement
    pub facilitator_url: String,

    /// Bound on one facilitator verify + settle exchange
    pub facilitator_timeout: Duration,

    /// Maximum timeout in seconds for payment validity
    pub max_timeout_seconds: u64,

    /// Tolerance added to `validBefore` when expiring replay-cache entries
    pub clock_skew: Duration,

    /// EIP-712 domain name override
    pub token_name: Option<String>,

    /// EIP-712 domain version override
    pub token_version: Option<String>,

    /// Accept that an in-memory replay cache forgets nonces on restart
    pub allow_volatile_replay_cache: bool,

    /// How often expired nonces are purged from the replay cache
    pub eviction_interval: Duration,
}

impl PaymentConfig {
    /// Default public facilitator.
    pub const DEFAULT_FACILITATOR_URL: &'static str = "https://x402.org/facilitator";

    /// Creates a new payment configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use x402_gate::networks::NetworkRegistry;
    /// use x402_gate::server::PaymentConfig;
    ///
    /// let config = PaymentConfig::new(
    ///     "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb",
    ///     "base-sepolia",
    ///     "$0.01",
    ///     "https://x402.org/facilitator",
    /// );
    /// let requirements = config.to_requirements("/api/weather", &NetworkRegistry::default()).unwrap();
    /// assert_eq!(requirements.max_amount_required.get(), 10_000);
    /// ```
    pub fn new(
        pay_to: impl Into<String>,
        network: impl Into<String>,
        price: impl Into<Price>,
        facilitator_url: impl Into<String>,
    ) -> Self {
        Self {
            pay_to: pay_to.into(),
            network: network.into(),
            scheme: ExactEvm::NAME.to_string(),
            price: price.into(),
            asset: None,
            decimals: None,
            description: String::new(),
            mime_type: Some("application/json".to_string()),
            facilitator_url: facilitator_url.into(),
            facilitator_timeout: FacilitatorClient::DEFAULT_TIMEOUT,
            max_timeout_seconds: 60,
            clock_skew: Duration::from_secs(10),
            token_name: None,
            token_version: None,
            allow_volatile_replay_cache: false,
            eviction_interval: Duration::from_secs(30),
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// `PAY_TO` is required. `X402_NETWORK` defaults to `base-sepolia`,
    /// `X402_PRICE` to `$0.0001` and `FACILITATOR_URL` to the public facilitator.
    /// `FACILITATOR_TIMEOUT_SECS` and `X402_ALLOW_VOLATILE_REPLAY_CACHE` are optional.
    pub fn from_env() -> Result<Self> {
        let pay_to = std::env::var("PAY_TO")
            .map_err(|_| X402Error::ConfigError("PAY_TO is not set".to_string()))?;
        let network = std::env::var("X402_NETWORK").unwrap_or_else(|_| "base-sepolia".to_string());
        let price = std::env::var("X402_PRICE").unwrap_or_else(|_| "$0.0001".to_string());
        let facilitator_url = std::env::var("FACILITATOR_URL")
            .unwrap_or_else(|_| Self::DEFAULT_FACILITATOR_URL.to_string());

        let mut config = Self::new(pay_to, network, price, facilitator_url);
        if let Ok(secs) = std::env::var("FACILITATOR_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                X402Error::ConfigError(format!("FACILITATOR_TIMEOUT_SECS '{}': {}", secs, e))
            })?;
            config.facilitator_timeout = Duration::from_secs(secs);
        }
        if let Ok(flag) = std::env::var("X402_ALLOW_VOLATILE_REPLAY_CACHE") {
            config.allow_volatile_replay_cache =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    /// Sets the timeout for payment validity.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Sets token metadata for EIP-712.
    pub fn with_token_metadata(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.token_name = Some(name.into());
        self.token_version = Some(version.into());
        self
    }

    /// Prices the route in a specific token instead of the network's USDC.
    pub fn with_asset(mut self, asset: impl Into<String>, decimals: u8) -> Self {
        self.asset = Some(asset.into());
        self.decimals = Some(decimals);
        self
    }

    /// Sets the description shown in the challenge.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the MIME type shown in the challenge.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the bound on one facilitator exchange.
    pub fn with_facilitator_timeout(mut self, timeout: Duration) -> Self {
        self.facilitator_timeout = timeout;
        self
    }

    /// Sets how often the replay cache is swept.
    pub fn with_eviction_interval(mut self, every: Duration) -> Self {
        self.eviction_interval = every;
        self
    }

    /// Sets the clock skew tolerance for replay-cache expiry.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Acknowledges (or not) that an in-memory replay cache is acceptable.
    pub fn allow_volatile_replay_cache(mut self, allow: bool) -> Self {
        self.allow_volatile_replay_cache = allow;
        self
    }

    /// Converts the configuration to payment requirements.
    pub fn to_requirements(
        &self,
        resource: &str,
        networks: &NetworkRegistry,
    ) -> Result<PaymentRequirements> {
        networks.require(&self.network)?;
        parse_address(&self.pay_to)?;

        let (asset, known) = match &self.asset {
            Some(asset) => (asset.clone(), networks.token(&self.network, asset)),
            None => {
                let token = networks.default_token(&self.network).ok_or_else(|| {
                    X402Error::ConfigError(format!(
                        "no default asset on {}; configure one with with_asset",
                        self.network
                    ))
                })?;
                (token.address.clone(), Some(token))
            }
        };
        parse_address(&asset)?;

        let max_amount_required = match &self.price {
            Price::TokenAmount(amount) => *amount,
            Price::Money(price) => {
                let decimals = self
                    .decimals
                    .or_else(|| known.map(|t| t.decimals))
                    .ok_or_else(|| {
                        X402Error::ConfigError(format!("decimals unknown for asset {}", asset))
                    })?;
                money_to_token_amount(price, decimals)?
            }
        };
        if max_amount_required.is_zero() {
            return Err(X402Error::InvalidAmount("route price must be positive".to_string()));
        }

        let name = self.token_name.clone().or_else(|| known.map(|t| t.eip712_name.clone()));
        let version = self
            .token_version
            .clone()
            .or_else(|| known.map(|t| t.eip712_version.clone()));
        let mut extra = serde_json::Map::new();
        if let Some(name) = name {
            extra.insert("name".to_string(), json!(name));
        }
        if let Some(version) = version {
            extra.insert("version".to_string(), json!(version));
        }

        Ok(PaymentRequirements {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            max_amount_required,
            resource: resource.to_string(),
            description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            mime_type: self.mime_type.clone(),
            output_schema: None,
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset,
            extra: if extra.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(extra))
            },
        })
    }
}

/// Where a request is in the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Request arrived; header not inspected yet
    AwaitingHeader,
    /// No payment presented; 402 sent
    ChallengeIssued,
    /// Local checks and facilitator round trip in progress
    Verifying,
    /// Facilitator confirmed settlement
    Settled,
    /// Forwarded to the protected handler
    Passthrough,
    /// Refused with a reason code
    Rejected,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateState::AwaitingHeader => "awaiting_header",
            GateState::ChallengeIssued => "challenge_issued",
            GateState::Verifying => "verifying",
            GateState::Settled => "settled",
            GateState::Passthrough => "passthrough",
            GateState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Terminal result of evaluating one request.
#[derive(Debug)]
pub enum GateOutcome {
    /// No payment was presented; answer 402 with the requirements
    ChallengeIssued(PaymentRequiredResponse),
    /// The payment was refused locally or by the facilitator
    Rejected {
        /// Why the payment was refused
        error: X402Error,
        /// Fresh challenge carrying the reason code
        challenge: PaymentRequiredResponse,
    },
    /// The facilitator could not be asked; the payment was not judged
    Unavailable(X402Error),
    /// Verified and settled; the request may proceed
    Settled(SettlementReceipt),
}

/// Guards one protected resource.
pub struct PaymentGate {
    requirements: PaymentRequirements,
    schemes: Arc<SchemeRegistry>,
    facilitator: Arc<dyn Facilitator>,
    nonces: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
    eviction: Option<JoinHandle<()>>,
}

impl PaymentGate {
    /// Creates a gate enforcing `requirements`.
    ///
    /// A non-persistent `nonces` store is refused with [`X402Error::ConfigError`]
    /// unless `allow_volatile_replay_cache` is set: after a restart such a store
    /// would accept authorizations it had already seen.
    pub fn new(
        requirements: PaymentRequirements,
        facilitator: Arc<dyn Facilitator>,
        nonces: Arc<dyn NonceStore>,
        allow_volatile_replay_cache: bool,
    ) -> Result<Self> {
        if requirements.max_amount_required.is_zero() {
            return Err(X402Error::InvalidAmount("route price must be positive".to_string()));
        }
        if !nonces.is_persistent() {
            if !allow_volatile_replay_cache {
                return Err(X402Error::ConfigError(
                    "replay cache is in memory only; a restart reopens a replay window. \
                     Set allow_volatile_replay_cache to accept this"
                        .to_string(),
                ));
            }
            tracing::warn!(
                resource = %requirements.resource,
                "using a volatile replay cache; nonces are forgotten on restart"
            );
        }
        Ok(Self {
            requirements,
            schemes: Arc::new(SchemeRegistry::default()),
            facilitator,
            nonces,
            clock: Arc::new(SystemClock),
            clock_skew: Duration::from_secs(10),
            eviction: None,
        })
    }

    /// Builds a running gate for `resource` with the remote facilitator and an
    /// in-memory replay cache.
    ///
    /// Eviction is already started, every `config.eviction_interval`, and stops
    /// when the last reference to the gate is dropped.
    pub async fn from_config(config: &PaymentConfig, resource: &str) -> Result<Arc<Self>> {
        let requirements = config.to_requirements(resource, &NetworkRegistry::default())?;
        let facilitator = FacilitatorClient::try_new(&config.facilitator_url)?
            .with_timeout(config.facilitator_timeout);
        Ok(Self::new(
            requirements,
            Arc::new(facilitator),
            Arc::new(InMemoryNonceStore::new()),
            config.allow_volatile_replay_cache,
        )?
        .with_clock_skew(config.clock_skew)
        .start(config.eviction_interval))
    }

    /// Starts purging expired nonces every `every` and shares the gate.
    ///
    /// Gates built with [`PaymentGate::new`] must be started before serving,
    /// otherwise the replay cache only grows. Must be called inside a Tokio runtime.
    pub fn start(mut self, every: Duration) -> Arc<Self> {
        if let Some(previous) = self.eviction.take() {
            previous.abort();
        }
        self.eviction = Some(spawn_eviction(
            Arc::clone(&self.nonces),
            Arc::clone(&self.clock),
            every,
        ));
        Arc::new(self)
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the scheme registry.
    pub fn with_schemes(mut self, schemes: Arc<SchemeRegistry>) -> Self {
        self.schemes = schemes;
        self
    }

    /// Sets how long past `validBefore` a nonce is remembered.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// The requirements this gate enforces.
    pub fn requirements(&self) -> &PaymentRequirements {
        &self.requirements
    }

    /// The replay cache backing this gate.
    pub fn nonce_store(&self) -> &Arc<dyn NonceStore> {
        &self.nonces
    }

    /// The 402 body for this route, optionally carrying why a payment was refused.
    pub fn challenge(&self, error: Option<&X402Error>) -> PaymentRequiredResponse {
        PaymentRequiredResponse {
            x402_version: X402_VERSION,
            accepts: vec![self.requirements.clone()],
            error: error.map(X402Error::reason_code),
        }
    }

    /// Runs the gate for one request carrying `header` (the raw `X-PAYMENT` value).
    pub async fn evaluate(&self, header: Option<&str>) -> GateOutcome {
        let resource = self.requirements.resource.as_str();
        let Some(header) = header else {
            tracing::debug!(
                resource,
                from = %GateState::AwaitingHeader,
                to = %GateState::ChallengeIssued,
                "no payment presented"
            );
            return GateOutcome::ChallengeIssued(self.challenge(None));
        };

        tracing::debug!(resource, state = %GateState::Verifying, "payment presented");
        match self.verify(header).await {
            Ok(receipt) => {
                tracing::info!(
                    resource,
                    state = %GateState::Settled,
                    payer = ?receipt.payer,
                    settlement_ref = receipt.settlement_ref.as_deref().unwrap_or_default(),
                    "payment settled"
                );
                GateOutcome::Settled(receipt)
            }
            Err(error @ X402Error::ServiceUnavailable(_)) => {
                tracing::warn!(resource, error = %error, "facilitator unavailable");
                GateOutcome::Unavailable(error)
            }
            Err(error) => self.reject(error),
        }
    }

    fn reject(&self, error: X402Error) -> GateOutcome {
        tracing::warn!(
            resource = %self.requirements.resource,
            state = %GateState::Rejected,
            reason = %error.reason_code(),
            error = %error,
            "payment rejected"
        );
        GateOutcome::Rejected {
            challenge: self.challenge(Some(&error)),
            error,
        }
    }

    /// Latest `validBefore` this route accepts for an authorization presented at `now`.
    fn latest_valid_before(&self, now: UnixTimestamp) -> UnixTimestamp {
        let lifetime = match self.requirements.max_timeout_seconds {
            0 => PaymentAuthorizationBuilder::DEFAULT_TTL.as_secs(),
            max => max,
        };
        now.saturating_add(lifetime.saturating_add(self.clock_skew.as_secs()))
    }

    async fn verify(&self, header: &str) -> Result<SettlementReceipt> {
        let payload = decode_payment_header(header)?;
        let authorization = &payload.payload.authorization;

        let now = self.clock.now();
        if now >= authorization.valid_before {
            return Err(X402Error::Expired);
        }
        let latest = self.latest_valid_before(now);
        if authorization.valid_before > latest {
            return Err(X402Error::RequirementsMismatch(format!(
                "validBefore {} is past the route's window ending at {}",
                authorization.valid_before, latest
            )));
        }

        self.schemes
            .require(&self.requirements.scheme)?
            .check_requirements(&payload, &self.requirements)?;

        let key = ReplayKey::new(payload.payer(), &self.requirements.asset, authorization.nonce);
        let expires_at = authorization
            .valid_before
            .saturating_add(self.clock_skew.as_secs());
        if !self.nonces.try_claim(key.clone(), expires_at).await {
            return Err(X402Error::ReplayDetected);
        }

        let outcome = self
            .facilitator
            .verify_and_settle(&payload, &self.requirements)
            .await
            .and_then(SettlementReceipt::into_result);
        if outcome.is_err() {
            self.nonces.release(&key).await;
        }
        outcome
    }
}

impl fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGate")
            .field("requirements", &self.requirements)
            .field("schemes", &self.schemes)
            .field("clock_skew", &self.clock_skew)
            .field("evicting", &self.eviction.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for PaymentGate {
    fn drop(&mut self) {
        if let Some(eviction) = self.eviction.take() {
            eviction.abort();
        }
    }
}

/// Axum middleware enforcing a [`PaymentGate`].
///
/// Use with `axum::middleware::from_fn_with_state(Arc<PaymentGate>, require_payment)`.
pub async fn require_payment(
    State(gate): State<Arc<PaymentGate>>,
    request: Request,
    next: Next,
) -> Response {
    let header = match request.headers().get(PAYMENT_HEADER).map(HeaderValue::to_str) {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value.to_owned())),
        Some(Err(e)) => Err(X402Error::MalformedChallenge(format!(
            "X-PAYMENT is not visible ASCII: {}",
            e
        ))),
    };
    let outcome = match header {
        Ok(header) => gate.evaluate(header.as_deref()).await,
        Err(error) => gate.reject(error),
    };

    match outcome {
        GateOutcome::ChallengeIssued(challenge) => {
            (StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response()
        }
        GateOutcome::Rejected { error, challenge } => {
            let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::PAYMENT_REQUIRED);
            (status, Json(challenge)).into_response()
        }
        GateOutcome::Unavailable(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": error.reason_code() })),
        )
            .into_response(),
        GateOutcome::Settled(receipt) => {
            let mut response = next.run(request).await;
            match encode_payment_response(&receipt.to_payment_response())
                .ok()
                .and_then(|encoded| HeaderValue::from_str(&encoded).ok())
            {
                Some(value) => {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static("x-payment-response"), value);
                }
                None => tracing::error!("could not encode payment response header"),
            }
            tracing::debug!(resource = %gate.requirements.resource, state = %GateState::Passthrough, "served paid request");
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::signer::SignerIdentity;
    use crate::types::{PaymentPayload, PAYMENT_RESPONSE_HEADER};
    use crate::utils::decode_payment_response;
    use async_trait::async_trait;
    use ethers::types::{Address, H256};
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tower::ServiceExt;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const PAY_TO: &str = "0x100278f4de251afd6006920e917a683b3b4976d2";
    const NOW: u64 = 1_750_000_000;

    #[derive(Clone, Copy)]
    enum Mode {
        Settle,
        Reject,
        Down,
    }

    struct MockFacilitator {
        mode: Mutex<Mode>,
        calls: AtomicUsize,
    }

    impl MockFacilitator {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode: Mutex::new(mode),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Facilitator for MockFacilitator {
        async fn verify_and_settle(
            &self,
            payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<SettlementReceipt> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mode = *self.mode.lock().unwrap();
            match mode {
                Mode::Settle => Ok(SettlementReceipt::settled("0xfeed", &payload.network, payload.payer())),
                Mode::Reject => Ok(SettlementReceipt::rejected(
                    "insufficient_funds",
                    &payload.network,
                    payload.payer(),
                )),
                Mode::Down => Err(X402Error::ServiceUnavailable("timeout".to_string())),
            }
        }
    }

    fn config() -> PaymentConfig {
        PaymentConfig::new(PAY_TO, "base-sepolia", TokenAmount(100), "http://127.0.0.1:1/")
            .allow_volatile_replay_cache(true)
    }

    fn requirements(resource: &str) -> PaymentRequirements {
        config().to_requirements(resource, &NetworkRegistry::default()).unwrap()
    }

    fn gate(facilitator: Arc<MockFacilitator>, clock: Arc<ManualClock>) -> PaymentGate {
        PaymentGate::new(
            requirements("/check"),
            facilitator,
            Arc::new(InMemoryNonceStore::new()),
            true,
        )
        .unwrap()
        .with_clock(clock)
    }

    async fn header_for(requirements: &PaymentRequirements, clock: &ManualClock) -> String {
        let signer = SignerIdentity::from_private_key(TEST_KEY).unwrap();
        PaymentAuthorizationBuilder::default()
            .build(requirements, Some(&signer), clock)
            .await
            .unwrap()
            .encode()
            .unwrap()
    }

    fn rejection(outcome: GateOutcome) -> (X402Error, PaymentRequiredResponse) {
        match outcome {
            GateOutcome::Rejected { error, challenge } => (error, challenge),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_to_requirements_uses_network_usdc() {
        let config = PaymentConfig::new(PAY_TO, "base-sepolia", "$0.0001", "https://x402.org/facilitator")
            .with_description("Check access");
        let req = config.to_requirements("/check", &NetworkRegistry::default()).unwrap();

        assert_eq!(req.max_amount_required, TokenAmount(100));
        assert_eq!(req.asset, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(req.extra_str("name"), Some("USDC"));
        assert_eq!(req.extra_str("version"), Some("2"));
        assert_eq!(req.description.as_deref(), Some("Check access"));
        assert_eq!(req.max_timeout_seconds, 60);
    }

    #[test]
    fn test_to_requirements_rejects_bad_config() {
        let networks = NetworkRegistry::default();
        let unknown = PaymentConfig::new(PAY_TO, "solana", "$0.01", "https://x402.org/facilitator");
        assert!(matches!(
            unknown.to_requirements("/check", &networks),
            Err(X402Error::UnsupportedNetwork(_))
        ));

        let free = PaymentConfig::new(PAY_TO, "base-sepolia", "0", "https://x402.org/facilitator");
        assert!(matches!(free.to_requirements("/check", &networks), Err(X402Error::InvalidAmount(_))));

        let custom_without_decimals = PaymentConfig {
            asset: Some("0x1111111111111111111111111111111111111111".to_string()),
            ..PaymentConfig::new(PAY_TO, "base-sepolia", "1", "https://x402.org/facilitator")
        };
        assert!(matches!(
            custom_without_decimals.to_requirements("/check", &networks),
            Err(X402Error::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_volatile_store_needs_acknowledgement() {
        let err = PaymentGate::new(
            requirements("/check"),
            MockFacilitator::new(Mode::Settle),
            Arc::new(InMemoryNonceStore::new()),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, X402Error::ConfigError(_)));

        let err = PaymentGate::from_config(&config().allow_volatile_replay_cache(false), "/check")
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_missing_header_issues_challenge() {
        let gate = gate(MockFacilitator::new(Mode::Settle), Arc::new(ManualClock::new(NOW)));
        match gate.evaluate(None).await {
            GateOutcome::ChallengeIssued(challenge) => {
                assert_eq!(challenge.x402_version, 1);
                assert_eq!(challenge.accepts, vec![requirements("/check")]);
                assert!(challenge.error.is_none());
            }
            other => panic!("expected a challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_payment_settles() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/check"), &clock).await;

        match gate.evaluate(Some(&header)).await {
            GateOutcome::Settled(receipt) => assert_eq!(receipt.settlement_ref.as_deref(), Some("0xfeed")),
            other => panic!("expected settlement, got {other:?}"),
        }
        assert_eq!(facilitator.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_header() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let gate = gate(facilitator.clone(), Arc::new(ManualClock::new(NOW)));

        let (error, challenge) = rejection(gate.evaluate(Some("not base64!")).await);
        assert!(matches!(error, X402Error::MalformedChallenge(_)));
        assert_eq!(challenge.error.as_deref(), Some("malformed_payment"));
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_payment_never_reaches_facilitator() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/check"), &clock).await;

        clock.advance(60);
        let (error, challenge) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::Expired));
        assert!(error.is_retryable_with_fresh_authorization());
        assert_eq!(challenge.error.as_deref(), Some("expired"));
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_window_longer_than_route_timeout_is_mismatch() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());

        let ten_years = Duration::from_secs(10 * 365 * 24 * 3600);
        let mut long_lived = requirements("/check");
        long_lived.max_timeout_seconds = ten_years.as_secs();
        let signer = SignerIdentity::from_private_key(TEST_KEY).unwrap();
        let header = PaymentAuthorizationBuilder::default()
            .with_ttl(ten_years)
            .build(&long_lived, Some(&signer), clock.as_ref())
            .await
            .unwrap()
            .encode()
            .unwrap();

        let (error, challenge) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::RequirementsMismatch(_)));
        assert_eq!(challenge.error.as_deref(), Some("requirements_mismatch"));
        assert_eq!(facilitator.calls(), 0);
        assert_eq!(gate.nonce_store().purge_expired(UnixTimestamp(u64::MAX)).await, 0);
    }

    #[tokio::test]
    async fn test_window_within_route_timeout_and_skew_is_accepted() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/check"), &clock).await;

        // A payer clock running ahead by less than the skew still fits.
        clock.set(NOW - 5);
        assert!(matches!(gate.evaluate(Some(&header)).await, GateOutcome::Settled(_)));
        assert_eq!(facilitator.calls(), 1);
    }

    #[tokio::test]
    async fn test_payment_for_other_resource_is_mismatch() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/cheap"), &clock).await;

        let (error, challenge) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::RequirementsMismatch(_)));
        assert_eq!(challenge.error.as_deref(), Some("requirements_mismatch"));
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_cheaper_payment_is_mismatch() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let mut cheaper = requirements("/check");
        cheaper.max_amount_required = TokenAmount(1);
        let header = header_for(&cheaper, &clock).await;

        let (error, _) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::RequirementsMismatch(_)));
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_replay_is_detected_before_facilitator() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/check"), &clock).await;

        assert!(matches!(gate.evaluate(Some(&header)).await, GateOutcome::Settled(_)));
        let (error, challenge) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::ReplayDetected));
        assert_eq!(challenge.error.as_deref(), Some("replay_detected"));
        assert_eq!(facilitator.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejection_and_outage_release_the_nonce() {
        let facilitator = MockFacilitator::new(Mode::Reject);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = gate(facilitator.clone(), clock.clone());
        let header = header_for(&requirements("/check"), &clock).await;

        let (error, challenge) = rejection(gate.evaluate(Some(&header)).await);
        assert!(matches!(error, X402Error::PaymentRejected(_)));
        assert_eq!(challenge.error.as_deref(), Some("insufficient_funds"));

        facilitator.set(Mode::Down);
        assert!(matches!(
            gate.evaluate(Some(&header)).await,
            GateOutcome::Unavailable(X402Error::ServiceUnavailable(_))
        ));

        facilitator.set(Mode::Settle);
        assert!(matches!(gate.evaluate(Some(&header)).await, GateOutcome::Settled(_)));
        assert_eq!(facilitator.calls(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_presentations_settle_once() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = Arc::new(gate(facilitator.clone(), clock.clone()));
        let header = header_for(&requirements("/check"), &clock).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = Arc::clone(&gate);
            let header = header.clone();
            handles.push(tokio::spawn(async move { gate.evaluate(Some(&header)).await }));
        }
        let mut settled = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), GateOutcome::Settled(_)) {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);
        assert_eq!(facilitator.calls(), 1);
    }

    #[tokio::test]
    async fn test_from_config_gate_evicts_expired_nonces() {
        let config = config().with_eviction_interval(Duration::from_millis(10));
        let gate = PaymentGate::from_config(&config, "/check").await.unwrap();
        let key = ReplayKey::new(Address::repeat_byte(0x11), &gate.requirements().asset, H256::repeat_byte(7));

        assert!(gate.nonce_store().try_claim(key.clone(), UnixTimestamp(1)).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(gate.nonce_store().try_claim(key, UnixTimestamp(1)).await);
    }

    fn app(gate: Arc<PaymentGate>) -> Router {
        Router::new()
            .route("/check", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(gate, require_payment))
    }

    #[tokio::test]
    async fn test_middleware_challenges_then_passes() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = Arc::new(gate(facilitator, clock.clone()));

        let response = app(gate.clone())
            .oneshot(Request::builder().uri("/check").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let challenge: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(challenge.accepts[0].resource, "/check");

        let header = header_for(&requirements("/check"), &clock).await;
        let response = app(gate)
            .oneshot(
                Request::builder()
                    .uri("/check")
                    .header(PAYMENT_HEADER, header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let receipt = response.headers().get(PAYMENT_RESPONSE_HEADER).unwrap().to_str().unwrap();
        let receipt = decode_payment_response(receipt).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.transaction, "0xfeed");
    }

    #[tokio::test]
    async fn test_middleware_non_ascii_header_is_malformed() {
        let facilitator = MockFacilitator::new(Mode::Settle);
        let gate = Arc::new(gate(facilitator.clone(), Arc::new(ManualClock::new(NOW))));

        let response = app(gate)
            .oneshot(
                Request::builder()
                    .uri("/check")
                    .header(PAYMENT_HEADER, HeaderValue::from_bytes(b"caf\xc3\xa9").unwrap())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let challenge: PaymentRequiredResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(challenge.error.as_deref(), Some("malformed_payment"));
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_middleware_outage_is_503() {
        let clock = Arc::new(ManualClock::new(NOW));
        let gate = Arc::new(gate(MockFacilitator::new(Mode::Down), clock.clone()));
        let header = header_for(&requirements("/check"), &clock).await;

        let response = app(gate)
            .oneshot(
                Request::builder()
                    .uri("/check")
                    .header(PAYMENT_HEADER, header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "service_unavailable");
    }
}
