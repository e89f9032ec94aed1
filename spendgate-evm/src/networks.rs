//! Known EVM networks and the contract deployments settlement relies on.
//!
//! The `SpendPermissionManager`, ERC-4337 v0.6 `EntryPoint` and Coinbase Smart
//! Wallet factory are deployed at the same addresses on every supported chain.

use alloy_primitives::{Address, TxHash, address};

/// Numeric EIP-155 chain ID.
pub type ChainId = u64;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: ChainId = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: ChainId = 84532;

/// `SpendPermissionManager` contract address.
pub const SPEND_PERMISSION_MANAGER: Address = address!("0xf85210B21cC50302F477BA56686d2019dC9b67Ad");

/// ERC-4337 v0.6 `EntryPoint` contract address.
pub const ENTRY_POINT_V06: Address = address!("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");

/// Coinbase Smart Wallet factory (v1) contract address.
pub const SMART_WALLET_FACTORY: Address = address!("0x0BA5ED0c6AA8c49038F819E587E2633c4A9F428a");

/// Contract deployments and explorer for one EVM network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// CAIP-2 identifier, e.g. `eip155:8453`.
    pub network: String,
    /// Numeric chain ID.
    pub chain_id: ChainId,
    /// Block-explorer base URL without a trailing slash, if any.
    pub explorer: Option<String>,
    /// `SpendPermissionManager` address.
    pub spend_permission_manager: Address,
    /// `EntryPoint` address user operations are submitted to.
    pub entry_point: Address,
    /// Smart wallet factory used to derive and deploy the spender account.
    pub wallet_factory: Address,
}

impl NetworkConfig {
    /// Creates a network using the canonical contract deployments.
    #[must_use]
    pub fn new(chain_id: ChainId, explorer: Option<&str>) -> Self {
        Self {
            network: format!("eip155:{chain_id}"),
            chain_id,
            explorer: explorer.map(|e| e.trim_end_matches('/').to_owned()),
            spend_permission_manager: SPEND_PERMISSION_MANAGER,
            entry_point: ENTRY_POINT_V06,
            wallet_factory: SMART_WALLET_FACTORY,
        }
    }

    /// Block-explorer link for a transaction on this network.
    #[must_use]
    pub fn transaction_url(&self, tx_hash: &TxHash) -> Option<String> {
        self.explorer
            .as_ref()
            .map(|base| format!("{base}/tx/{tx_hash}"))
    }
}

/// Returns configurations for all known networks.
#[must_use]
pub fn known_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig::new(BASE_MAINNET, Some("https://basescan.org")),
        NetworkConfig::new(BASE_SEPOLIA, Some("https://sepolia.basescan.org")),
    ]
}

/// Parses a CAIP-2 `eip155:<id>` identifier into its numeric chain ID.
#[must_use]
pub fn parse_caip2(network: &str) -> Option<ChainId> {
    network.strip_prefix("eip155:")?.parse().ok()
}

/// Looks a known network up by CAIP-2 identifier.
#[must_use]
pub fn network_by_caip2(network: &str) -> Option<NetworkConfig> {
    let chain_id = parse_caip2(network)?;
    known_networks().into_iter().find(|n| n.chain_id == chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_caip2() {
        assert_eq!(parse_caip2("eip155:8453"), Some(BASE_MAINNET));
        assert_eq!(parse_caip2("eip155:abc"), None);
        assert_eq!(parse_caip2("solana:mainnet"), None);
    }

    #[test]
    fn test_lookup_known_network() {
        let sepolia = network_by_caip2("eip155:84532").unwrap();
        assert_eq!(sepolia.chain_id, BASE_SEPOLIA);
        assert_eq!(sepolia.entry_point, ENTRY_POINT_V06);
        assert!(network_by_caip2("eip155:1").is_none());
    }

    #[test]
    fn test_transaction_url() {
        let base = network_by_caip2("eip155:8453").unwrap();
        let url = base.transaction_url(&TxHash::repeat_byte(0xab)).unwrap();
        assert_eq!(url, format!("https://basescan.org/tx/0x{}", "ab".repeat(32)));

        let custom = NetworkConfig::new(31337, None);
        assert!(custom.transaction_url(&TxHash::ZERO).is_none());
    }
}
