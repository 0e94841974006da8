//! Router Filtering
//!
//! Filters transactions by destination address against a fixed set of
//! router contracts. Targets Uniswap V2 style routers by default.

use std::collections::HashSet;
use std::str::FromStr;

use alloy::primitives::Address;
use thiserror::Error;

/// Router addresses watched when none are configured
pub const DEFAULT_ROUTERS: &[&str] = &[
    // Uniswap V2
    "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D",
    // Uniswap V3
    "0x8ad599c3A0ff1De082011EFDDc58f1908eb6e6D8",
    // SushiSwap
    "0xd9e1cE17f2641f24aE83637ab66a2cca9C378B9F",
];

/// Errors that can occur while building a router set
#[derive(Error, Debug, PartialEq)]
pub enum RouterSetError {
    #[error("Invalid router address `{0}`: expected 0x followed by 40 hex characters")]
    InvalidAddress(String),
}

/// Immutable allow-list of router contract addresses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterSet {
    routers: HashSet<Address>,
}

impl RouterSet {
    /// Create a router set from already-parsed addresses
    pub fn new(routers: impl IntoIterator<Item = Address>) -> Self {
        Self {
            routers: routers.into_iter().collect(),
        }
    }

    /// Parse a router set from hex strings (case-insensitive, 0x prefix optional)
    ///
    /// # Arguments
    /// * `routers` - Address strings, e.g. "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"
    ///
    /// # Returns
    /// The router set, or the first address that failed to parse
    pub fn parse<S: AsRef<str>>(routers: impl IntoIterator<Item = S>) -> Result<Self, RouterSetError> {
        routers
            .into_iter()
            .map(|s| parse_address(s.as_ref()))
            .collect::<Result<HashSet<_>, _>>()
            .map(|routers| Self { routers })
    }

    /// The three canonical routers from [`DEFAULT_ROUTERS`]
    pub fn defaults() -> Self {
        Self::parse(DEFAULT_ROUTERS).unwrap_or_default()
    }

    /// Check if a transaction destination is a watched router
    ///
    /// # Arguments
    /// * `to` - The destination address, `None` for contract creation
    ///
    /// # Returns
    /// `true` if the destination is in the set, `false` otherwise
    pub fn is_router(&self, to: Option<&Address>) -> bool {
        to.is_some_and(|address| self.routers.contains(address))
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.routers.iter()
    }
}

/// Parse a single address, ignoring hex case and the EIP-55 checksum
pub fn parse_address(input: &str) -> Result<Address, RouterSetError> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(RouterSetError::InvalidAddress(input.to_string()));
    }
    Address::from_str(&hex_part.to_ascii_lowercase())
        .map_err(|_| RouterSetError::InvalidAddress(input.to_string()))
}
