//! Client-side functionality for the x402 protocol.
//!
//! [`PaymentInterceptor`] wraps an outbound HTTP call. When the server answers
//! 402 Payment Required it decodes the challenge, picks a requirement, signs an
//! authorization and resends the same request once with the `X-PAYMENT`
//! header. Never more than two requests go out per call.

use crate::builder::PaymentAuthorizationBuilder;
use crate::challenge::decode_challenge;
use crate::clock::{Clock, SystemClock};
use crate::errors::{Result, X402Error};
use crate::schemes::SchemeRegistry;
use crate::signer::SignerIdentity;
use crate::types::{PaymentRequiredResponse, PaymentRequirements, TokenAmount, PAYMENT_RESPONSE_HEADER};
use crate::utils::decode_payment_response;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Something that can send an HTTP request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the response head with an unread body.
    async fn execute(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: Request) -> Result<Response> {
        Ok(reqwest::Client::execute(self, request).await?)
    }
}

/// Configuration for x402 client requests.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL that relative paths passed to `get`/`post` are resolved against
    pub base_url: Option<Url>,

    /// Preferred payment scheme (e.g., "exact")
    pub preferred_scheme: Option<String>,

    /// Preferred network (e.g., "base-sepolia")
    pub preferred_network: Option<String>,

    /// Refuse to pay more than this, in the asset's smallest unit
    pub max_amount: Option<TokenAmount>,

    /// Lifetime of a signed authorization
    pub ttl: Duration,

    /// How far `validAfter` is backdated
    pub clock_skew: Duration,
}

impl ClientConfig {
    /// Creates a configuration with no base URL and no preferences.
    pub fn new() -> Self {
        Self {
            base_url: None,
            preferred_scheme: Some("exact".to_string()),
            preferred_network: None,
            max_amount: None,
            ttl: PaymentAuthorizationBuilder::DEFAULT_TTL,
            clock_skew: PaymentAuthorizationBuilder::DEFAULT_CLOCK_SKEW,
        }
    }

    /// Reads `X402_BASE_URL` and `X402_CHAIN` (the preferred network).
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();
        if let Ok(base_url) = std::env::var("X402_BASE_URL") {
            config = config.with_base_url(&base_url)?;
        }
        if let Ok(chain) = std::env::var("X402_CHAIN") {
            config = config.with_network(chain);
        }
        Ok(config)
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Some(Url::parse(base_url)?);
        Ok(self)
    }

    /// Sets the preferred payment scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.preferred_scheme = Some(scheme.into());
        self
    }

    /// Sets the preferred network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.preferred_network = Some(network.into());
        self
    }

    /// Caps what a single call may pay.
    pub fn with_max_amount(mut self, max_amount: impl Into<TokenAmount>) -> Self {
        self.max_amount = Some(max_amount.into());
        self
    }

    /// Sets the authorization lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the clock skew allowance.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Pays for requests that answer 402.
pub struct PaymentInterceptor {
    transport: Arc<dyn HttpTransport>,
    signer: Option<SignerIdentity>,
    schemes: Arc<SchemeRegistry>,
    builder: PaymentAuthorizationBuilder,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
}

impl PaymentInterceptor {
    /// Creates an interceptor sending through a fresh `reqwest::Client`.
    ///
    /// Without a signer, unpaid requests still work; a 402 fails with
    /// [`X402Error::SignerUnavailable`].
    pub fn new(config: ClientConfig, signer: Option<SignerIdentity>) -> Self {
        let schemes = Arc::new(SchemeRegistry::default());
        Self {
            transport: Arc::new(reqwest::Client::new()),
            signer,
            builder: Self::builder_for(&config, Arc::clone(&schemes)),
            schemes,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Builds an interceptor from `X402_PRIVATE_KEY`, `X402_BASE_URL` and `X402_CHAIN`.
    pub fn from_env() -> Result<Self> {
        let signer = SignerIdentity::from_env("X402_PRIVATE_KEY")?;
        if signer.is_none() {
            tracing::warn!("X402_PRIVATE_KEY is not set; paid requests will fail");
        }
        Ok(Self::new(ClientConfig::from_env()?, signer))
    }

    fn builder_for(config: &ClientConfig, schemes: Arc<SchemeRegistry>) -> PaymentAuthorizationBuilder {
        PaymentAuthorizationBuilder::new(schemes)
            .with_ttl(config.ttl)
            .with_clock_skew(config.clock_skew)
    }

    /// Sends through `transport` instead of the default client.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replaces the scheme registry.
    pub fn with_schemes(mut self, schemes: Arc<SchemeRegistry>) -> Self {
        self.builder = Self::builder_for(&self.config, Arc::clone(&schemes));
        self.schemes = schemes;
        self
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured payer, if any.
    pub fn signer(&self) -> Option<&SignerIdentity> {
        self.signer.as_ref()
    }

    /// Sends `request`, paying for it once if the server asks.
    ///
    /// A 402 on the paid attempt surfaces as [`X402Error::PaymentRejected`]
    /// with the server's reason code and a 503 as
    /// [`X402Error::ServiceUnavailable`]; there is no third attempt.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let retry = request.try_clone().ok_or(X402Error::RequestNotCloneable)?;
        let url = request.url().clone();

        let response = self.transport.execute(request).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        let offered = decode_challenge(status, &body, &self.schemes)?;
        let requirements = self.select(&offered)?;
        self.check_limit(requirements)?;

        tracing::debug!(
            url = %url,
            scheme = %requirements.scheme,
            network = %requirements.network,
            amount = %requirements.max_amount_required,
            "paying for request"
        );
        let payload = self
            .builder
            .build(requirements, self.signer.as_ref(), self.clock.as_ref())
            .await?;

        let mut retry = retry;
        let header = HeaderValue::from_str(&payload.encode()?)
            .map_err(|e| X402Error::MalformedChallenge(format!("payment header: {}", e)))?;
        retry.headers_mut().insert(HeaderName::from_static("x-payment"), header);

        let response = self.transport.execute(retry).await?;
        Self::paid_outcome(&url, response).await
    }

    /// Sends a GET for `path`, resolved against the base URL if one is set.
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(Request::new(Method::GET, self.resolve(path)?)).await
    }

    /// Sends a JSON POST for `path`.
    pub async fn post<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let mut request = Request::new(Method::POST, self.resolve(path)?);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(serde_json::to_vec(body)?.into());
        self.send(request).await
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        match &self.config.base_url {
            Some(base) => Ok(base.join(path)?),
            None => Ok(Url::parse(path)?),
        }
    }

    /// Picks the first offer matching the preferences, else the server's first offer.
    fn select<'a>(&self, offered: &'a [PaymentRequirements]) -> Result<&'a PaymentRequirements> {
        let preferred = offered.iter().find(|r| {
            self.config.preferred_scheme.as_ref().map_or(true, |s| &r.scheme == s)
                && self.config.preferred_network.as_ref().map_or(true, |n| &r.network == n)
        });
        preferred
            .or_else(|| offered.first())
            .ok_or_else(|| X402Error::MalformedChallenge("challenge offers nothing payable".to_string()))
    }

    fn check_limit(&self, requirements: &PaymentRequirements) -> Result<()> {
        match self.config.max_amount {
            Some(limit) if requirements.max_amount_required > limit => Err(X402Error::AmountExceedsLimit {
                requested: requirements.max_amount_required.get(),
                limit: limit.get(),
            }),
            _ => Ok(()),
        }
    }

    async fn paid_outcome(url: &Url, response: Response) -> Result<Response> {
        match response.status() {
            StatusCode::PAYMENT_REQUIRED => {
                let body = response.bytes().await?;
                let reason = serde_json::from_slice::<PaymentRequiredResponse>(&body)
                    .ok()
                    .and_then(|challenge| challenge.error)
                    .unwrap_or_else(|| "payment_rejected".to_string());
                tracing::warn!(url = %url, reason = %reason, "payment rejected");
                Err(X402Error::PaymentRejected(reason))
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!(url = %url, "payment not judged; facilitator unavailable");
                Err(X402Error::ServiceUnavailable(format!("{} answered 503", url)))
            }
            _ => {
                if let Some(receipt) = response
                    .headers()
                    .get(PAYMENT_RESPONSE_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| decode_payment_response(value).ok())
                {
                    tracing::info!(
                        url = %url,
                        transaction = %receipt.transaction,
                        network = %receipt.network,
                        "payment settled"
                    );
                }
                Ok(response)
            }
        }
    }
}

impl std::fmt::Debug for PaymentInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentInterceptor")
            .field("signer", &self.signer)
            .field("schemes", &self.schemes)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
