//! ERC-4337 v0.6 user operations and the bundler's wire types.
//!
//! Quantities are rendered as `0x`-prefixed hex on the wire, which is how
//! `alloy_primitives::U256` serializes.

use alloy_primitives::{Address, B256, Bytes, TxHash, U256, keccak256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// An ERC-4337 v0.6 user operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// Smart account executing the operation.
    pub sender: Address,
    /// Anti-replay nonce (192-bit key, 64-bit sequence).
    pub nonce: U256,
    /// Factory address and calldata to deploy `sender`, or empty if deployed.
    pub init_code: Bytes,
    /// Calldata executed by `sender`.
    pub call_data: Bytes,
    /// Gas for the main execution call.
    pub call_gas_limit: U256,
    /// Gas for validation (and deployment, when `init_code` is set).
    pub verification_gas_limit: U256,
    /// Gas paid for bundler overhead.
    pub pre_verification_gas: U256,
    /// EIP-1559 max fee per gas.
    pub max_fee_per_gas: U256,
    /// EIP-1559 max priority fee per gas.
    pub max_priority_fee_per_gas: U256,
    /// Paymaster address and data, or empty when self-funded.
    pub paymaster_and_data: Bytes,
    /// Signature validated by `sender`.
    pub signature: Bytes,
}

impl UserOperation {
    /// Computes the hash the smart account signs and the bundler reports.
    ///
    /// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`, where
    /// `pack` hashes the dynamic fields and omits the signature.
    #[must_use]
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> B256 {
        let packed = (
            self.sender,
            self.nonce,
            keccak256(&self.init_code),
            keccak256(&self.call_data),
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
            self.max_fee_per_gas,
            self.max_priority_fee_per_gas,
            keccak256(&self.paymaster_and_data),
        )
            .abi_encode();
        keccak256((keccak256(packed), entry_point, U256::from(chain_id)).abi_encode())
    }

    /// Applies a bundler gas estimate.
    pub const fn apply_gas(&mut self, gas: &UserOperationGas) {
        self.call_gas_limit = gas.call_gas_limit;
        self.verification_gas_limit = gas.verification_gas_limit;
        self.pre_verification_gas = gas.pre_verification_gas;
    }
}

/// Result of `eth_estimateUserOperationGas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationGas {
    /// Estimated bundler overhead.
    pub pre_verification_gas: U256,
    /// Estimated validation gas.
    pub verification_gas_limit: U256,
    /// Estimated execution gas.
    pub call_gas_limit: U256,
}

/// Result of ERC-7677 `pm_getPaymasterStubData` / `pm_getPaymasterData` for v0.6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterData {
    /// Value for [`UserOperation::paymaster_and_data`].
    pub paymaster_and_data: Bytes,
    /// Whether the stub data is already final (no second call needed).
    #[serde(default)]
    pub is_final: bool,
}

/// Result of `eth_getUserOperationReceipt` once the operation is included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    /// Hash of the included user operation.
    pub user_op_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Revert reason, if execution failed.
    #[serde(default)]
    pub reason: Option<String>,
    /// The bundle transaction receipt.
    pub receipt: BundleTransactionReceipt,
}

/// The subset of the bundle transaction receipt the spender uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTransactionReceipt {
    /// Hash of the bundle transaction.
    pub transaction_hash: TxHash,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256, bytes};

    fn operation() -> UserOperation {
        UserOperation {
            sender: address!("0x1306b01bC3e4AD202612D3843387e94737673F53"),
            nonce: U256::from(8942u64),
            init_code: bytes!("6942069420694206942069420694206942069420"),
            call_data: bytes!("0000000000000000000000000000000000000000080085"),
            call_gas_limit: U256::from(10_000u64),
            verification_gas_limit: U256::from(100_000u64),
            pre_verification_gas: U256::from(100u64),
            max_fee_per_gas: U256::from(99_999u64),
            max_priority_fee_per_gas: U256::from(9_999_999u64),
            paymaster_and_data: Bytes::new(),
            signature: bytes!("da0929f527cded8d0a1eaf2e8861d7f7e2d8160b7b13942f99dd367df4473a"),
        }
    }

    #[test]
    fn test_hash_matches_entry_point_v06() {
        let hash = operation().hash(
            address!("0x66a15edcc3b50a663e72f1457ffd49b9ae284ddc"),
            1337,
        );
        assert_eq!(
            hash,
            b256!("0x1ab6b2a3ba438147bc5ec4eb7cdc3f1216bc7133bd2682dffcb9728be282045d")
        );
    }

    #[test]
    fn test_hash_ignores_signature() {
        let mut op = operation();
        let before = op.hash(crate::ENTRY_POINT_V06, 8453);
        op.signature = Bytes::from_static(&[0xff; 65]);
        assert_eq!(before, op.hash(crate::ENTRY_POINT_V06, 8453));
    }

    #[test]
    fn test_hash_binds_chain_and_entry_point() {
        let op = operation();
        let base = op.hash(crate::ENTRY_POINT_V06, 8453);
        assert_ne!(base, op.hash(crate::ENTRY_POINT_V06, 84532));
        assert_ne!(base, op.hash(Address::ZERO, 8453));
    }

    #[test]
    fn test_serializes_quantities_as_hex() {
        let json = serde_json::to_value(operation()).unwrap();
        assert_eq!(json["nonce"], "0x22ee");
        assert_eq!(json["callGasLimit"], "0x2710");
        assert!(json["initCode"].as_str().unwrap().starts_with("0x6942"));
    }

    #[test]
    fn test_receipt_deserializes_bundler_payload() {
        let receipt: UserOperationReceipt = serde_json::from_value(serde_json::json!({
            "userOpHash": format!("0x{}", "11".repeat(32)),
            "entryPoint": "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789",
            "sender": "0x1306b01bC3e4AD202612D3843387e94737673F53",
            "nonce": "0x0",
            "actualGasCost": "0x1",
            "actualGasUsed": "0x1",
            "success": false,
            "reason": "0x",
            "logs": [],
            "receipt": { "transactionHash": format!("0x{}", "22".repeat(32)), "blockNumber": "0x10" }
        }))
        .unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.receipt.transaction_hash, TxHash::repeat_byte(0x22));
    }
}
