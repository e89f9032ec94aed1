//! Solidity interface definitions for on-chain interactions.
//!
//! Contains the minimal ABI surface needed by the spender:
//! - [`ISpendPermissionManager`] - approval, spend and period accounting for spend permissions
//! - [`ICoinbaseSmartWallet`] - call execution on the spender's smart account
//! - [`ICoinbaseSmartWalletFactory`] - counterfactual address derivation and deployment
//! - [`IEntryPoint`] - ERC-4337 v0.6 nonce lookup
//! - [`SignatureWrapper`] - owner-indexed signature envelope expected by the smart wallet

use alloy_sol_types::sol;

use spendgate::SpendPermission;

sol! {
    /// `SpendPermissionManager` interface.
    ///
    /// Only the functions actually used by the spender are declared. The
    /// `SpendPermission` struct layout must match the contract exactly, as it
    /// is hashed (EIP-712) on-chain to identify the permission.
    ///
    /// Reference: <https://github.com/coinbase/spend-permissions>
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ISpendPermissionManager {
        struct SpendPermission {
            address account;
            address spender;
            address token;
            uint160 allowance;
            uint48 period;
            uint48 start;
            uint48 end;
            uint256 salt;
            bytes extraData;
        }

        struct PeriodSpend {
            uint48 start;
            uint48 end;
            uint160 spend;
        }

        function approveWithSignature(SpendPermission calldata spendPermission, bytes calldata signature) external returns (bool);
        function spend(SpendPermission memory spendPermission, uint160 value) external;
        function isApproved(SpendPermission memory spendPermission) external view returns (bool);
        function isRevoked(SpendPermission memory spendPermission) external view returns (bool);
        function getCurrentPeriod(SpendPermission memory spendPermission) external view returns (PeriodSpend memory);
    }
}

sol! {
    /// Coinbase Smart Wallet execution interface.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface ICoinbaseSmartWallet {
        struct Call {
            address target;
            uint256 value;
            bytes data;
        }

        function execute(address target, uint256 value, bytes calldata data) external payable;
        function executeBatch(Call[] calldata calls) external payable;
    }
}

sol! {
    /// Coinbase Smart Wallet factory interface.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ICoinbaseSmartWalletFactory {
        function createAccount(bytes[] calldata owners, uint256 nonce) external payable returns (address account);
        function getAddress(bytes[] calldata owners, uint256 nonce) external view returns (address);
    }
}

sol! {
    /// ERC-4337 v0.6 `EntryPoint` subset.
    ///
    /// Reference: <https://eips.ethereum.org/EIPS/eip-4337>
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }
}

sol! {
    /// Signature envelope verified by the smart wallet's `isValidSignature`
    /// and `validateUserOp`: the index of the signing owner plus its raw signature.
    #[derive(Debug)]
    struct SignatureWrapper {
        uint256 ownerIndex;
        bytes signatureData;
    }
}

impl From<&SpendPermission> for ISpendPermissionManager::SpendPermission {
    fn from(permission: &SpendPermission) -> Self {
        use alloy_primitives::aliases::U48;
        Self {
            account: permission.account,
            spender: permission.spender,
            token: permission.token,
            allowance: permission.allowance,
            period: U48::saturating_from(permission.period),
            start: U48::saturating_from(permission.start),
            end: U48::saturating_from(permission.end),
            salt: permission.salt,
            extraData: permission.extra_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::aliases::{U48, U160};
    use alloy_primitives::{Address, Bytes, U256};
    use alloy_sol_types::SolCall;

    use super::*;

    #[test]
    fn test_permission_maps_field_for_field() {
        let permission = SpendPermission {
            account: Address::repeat_byte(0xAA),
            spender: Address::repeat_byte(0xBB),
            token: Address::repeat_byte(0xCC),
            allowance: U160::from(1_000_000u64),
            period: 86_400,
            start: 1_700_000_000,
            end: 1_800_000_000,
            salt: U256::from(9u64),
            extra_data: Bytes::from_static(&[1, 2, 3]),
        };
        let onchain = ISpendPermissionManager::SpendPermission::from(&permission);
        assert_eq!(onchain.account, permission.account);
        assert_eq!(onchain.period, U48::from(86_400u64));
        assert_eq!(onchain.start, U48::from(1_700_000_000u64));
        assert_eq!(onchain.end, U48::from(1_800_000_000u64));
        assert_eq!(onchain.salt, U256::from(9u64));
        assert_eq!(onchain.extraData, permission.extra_data);
    }

    #[test]
    fn test_approve_with_signature_selector() {
        // approveWithSignature((address,address,address,uint160,uint48,uint48,uint48,uint256,bytes),bytes)
        let selector = ISpendPermissionManager::approveWithSignatureCall::SELECTOR;
        let expected = alloy_primitives::keccak256(
            "approveWithSignature((address,address,address,uint160,uint48,uint48,uint48,uint256,bytes),bytes)",
        );
        assert_eq!(selector, expected[..4]);
    }
}
