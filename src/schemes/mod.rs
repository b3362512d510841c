//! Payment scheme implementations.
//!
//! A scheme knows how to sign a payment for requirements it supports and how
//! to check that a presented payment satisfies a route's requirements. Schemes
//! are looked up by identifier in a [`SchemeRegistry`], so adding one means
//! registering it, not editing a dispatcher.

pub mod exact_evm;

use crate::errors::{Result, X402Error};
use crate::signer::SignerIdentity;
use crate::types::{PaymentPayload, PaymentRequirements, TransferAuthorization};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use exact_evm::ExactEvm;

/// Trait for implementing different payment schemes.
#[async_trait]
pub trait Scheme: Send + Sync {
    /// Returns the name of this scheme (e.g., "exact").
    fn name(&self) -> &str;

    /// Whether this scheme can pay for the given requirements (network known, fields well formed).
    fn supports(&self, requirements: &PaymentRequirements) -> bool;

    /// Signs `authorization` for `requirements` and wraps it into a payload.
    ///
    /// The window, nonce and amounts in `authorization` are already decided by
    /// the caller; the scheme only supplies the signing domain.
    async fn sign_payload(
        &self,
        requirements: &PaymentRequirements,
        authorization: TransferAuthorization,
        signer: &SignerIdentity,
    ) -> Result<PaymentPayload>;

    /// Checks that `payload` pays exactly for `requirements`.
    ///
    /// Fails with [`X402Error::RequirementsMismatch`] naming the first field that differs.
    fn check_requirements(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<()>;
}

/// Scheme implementations keyed by identifier.
#[derive(Clone)]
pub struct SchemeRegistry {
    schemes: HashMap<String, Arc<dyn Scheme>>,
}

impl SchemeRegistry {
    /// A registry without any scheme.
    pub fn empty() -> Self {
        Self {
            schemes: HashMap::new(),
        }
    }

    /// Adds a scheme under its own name, replacing any previous one.
    pub fn register(&mut self, scheme: Arc<dyn Scheme>) -> &mut Self {
        self.schemes.insert(scheme.name().to_string(), scheme);
        self
    }

    /// Looks up a scheme.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Scheme>> {
        self.schemes.get(name).cloned()
    }

    /// Looks up a scheme, failing with [`X402Error::UnsupportedScheme`].
    pub fn require(&self, name: &str) -> Result<Arc<dyn Scheme>> {
        self.get(name)
            .ok_or_else(|| X402Error::UnsupportedScheme(name.to_string()))
    }

    /// Whether some registered scheme can pay for `requirements`.
    pub fn supports(&self, requirements: &PaymentRequirements) -> bool {
        self.schemes
            .get(&requirements.scheme)
            .map(|scheme| scheme.supports(requirements))
            .unwrap_or(false)
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ExactEvm::default()));
        registry
    }
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.schemes.keys()).finish()
    }
}
