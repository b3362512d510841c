//! Known networks and token deployments.
//!
//! Requirements name their network by string (`"base-sepolia"`). The
//! [`NetworkRegistry`] maps those names to EVM chain ids, which are bound into
//! every signing domain, and knows the USDC deployment on each network so a
//! route can be priced in dollars without spelling out the token.

use crate::errors::{Result, X402Error};
use std::collections::HashMap;

/// An EVM network the protocol can pay on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Identifier used in requirements (e.g. `"base-sepolia"`)
    pub name: String,
    /// EIP-155 chain id
    pub chain_id: u64,
}

/// A token contract on a specific network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeployment {
    /// Contract address
    pub address: String,
    /// Token decimals
    pub decimals: u8,
    /// EIP-712 domain name
    pub eip712_name: String,
    /// EIP-712 domain version
    pub eip712_version: String,
}

impl TokenDeployment {
    fn usdc(address: &str, eip712_name: &str) -> Self {
        Self {
            address: address.to_string(),
            decimals: 6,
            eip712_name: eip712_name.to_string(),
            eip712_version: "2".to_string(),
        }
    }
}

/// Registry of networks keyed by name.
///
/// Starts with the networks the public facilitators serve; call
/// [`NetworkRegistry::register`] to add more.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: HashMap<String, Network>,
    default_tokens: HashMap<String, TokenDeployment>,
}

impl NetworkRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            networks: HashMap::new(),
            default_tokens: HashMap::new(),
        }
    }

    /// Adds or replaces a network, optionally with its default payment token.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        chain_id: u64,
        default_token: Option<TokenDeployment>,
    ) -> &mut Self {
        let name = name.into();
        if let Some(token) = default_token {
            self.default_tokens.insert(name.clone(), token);
        }
        self.networks.insert(name.clone(), Network { name, chain_id });
        self
    }

    /// Looks up a network by name.
    pub fn get(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    /// Looks up a network by name, failing with [`X402Error::UnsupportedNetwork`].
    pub fn require(&self, name: &str) -> Result<&Network> {
        self.get(name)
            .ok_or_else(|| X402Error::UnsupportedNetwork(name.to_string()))
    }

    /// The default payment token (USDC) for a network, if known.
    pub fn default_token(&self, name: &str) -> Option<&TokenDeployment> {
        self.default_tokens.get(name)
    }

    /// Finds the known deployment for an asset address on a network.
    pub fn token(&self, network: &str, asset: &str) -> Option<&TokenDeployment> {
        self.default_tokens
            .get(network)
            .filter(|token| token.address.eq_ignore_ascii_case(asset))
    }

    /// Whether the network is known.
    pub fn contains(&self, name: &str) -> bool {
        self.networks.contains_key(name)
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(
                "base",
                8453,
                Some(TokenDeployment::usdc("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", "USD Coin")),
            )
            .register(
                "base-sepolia",
                84532,
                Some(TokenDeployment::usdc("0x036CbD53842c5426634e7929541eC2318f3dCF7e", "USDC")),
            )
            .register(
                "avalanche",
                43114,
                Some(TokenDeployment::usdc("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E", "USD Coin")),
            )
            .register(
                "avalanche-fuji",
                43113,
                Some(TokenDeployment::usdc("0x5425890298aed601595a70AB815c96711a31Bc65", "USD Coin")),
            )
            .register(
                "polygon",
                137,
                Some(TokenDeployment::usdc("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359", "USD Coin")),
            )
            .register(
                "polygon-amoy",
                80002,
                Some(TokenDeployment::usdc("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582", "USDC")),
            );
        registry
    }
}
