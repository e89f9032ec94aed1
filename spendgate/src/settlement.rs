//! Settlement of spend permissions on-chain.
//!
//! A [`SettlementExecutor`] submits operations against the permission-manager
//! contract from the permission's spender account. Submission is two-phase:
//! the operation is first enqueued (yielding a pending operation hash) and then
//! awaited until it is included. Both phases complete before a
//! [`SettlementResult`] is returned; failures carry the
//! [`SettlementPhase`](crate::SettlementPhase) they came from.

use alloy_primitives::aliases::U160;
use alloy_primitives::{Address, B256, TxHash, U256};
use serde::Serialize;

use crate::BoxFuture;
use crate::error::SettlementError;
use crate::permission::{PermissionSignature, SpendPermission};

/// Outcome of a confirmed on-chain settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Whether the operation executed successfully.
    pub success: bool,
    /// Hash of the transaction that included the operation.
    pub transaction_hash: TxHash,
    /// Hash of the user operation as enqueued with the bundler.
    pub user_operation_hash: B256,
}

/// Submits approvals and spends for spend permissions.
pub trait SettlementExecutor: Send + Sync {
    /// Address permissions must name as their `spender` to be settleable here.
    fn spender_address(&self) -> Address;

    /// Approves a permission on-chain using the owner's signature.
    ///
    /// Re-approving an already approved permission is harmless.
    ///
    /// # Errors
    ///
    /// Returns a [`SettlementError`] tagged with the phase that failed.
    fn approve<'a>(
        &'a self,
        permission: &'a SpendPermission,
        signature: &'a PermissionSignature,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>>;

    /// Pulls `amount` from the account under an approved permission.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::AllowanceExceeded`] without submitting when
    /// the amount does not fit in the current period's remaining allowance.
    fn spend<'a>(
        &'a self,
        permission: &'a SpendPermission,
        amount: U160,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>>;

    /// Approves a permission and spends from it in one batched operation.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::AllowanceExceeded`] without submitting when
    /// `amount` exceeds the permission's allowance.
    fn approve_and_spend<'a>(
        &'a self,
        permission: &'a SpendPermission,
        signature: &'a PermissionSignature,
        amount: U160,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>>;

    /// Block-explorer URL for a settlement transaction, if the network has one.
    fn explorer_url(&self, transaction_hash: &TxHash) -> Option<String>;
}

/// Checks a requested spend against what the current period has consumed.
///
/// Advisory only: it avoids submitting an operation that the contract would
/// reject, but the contract remains the source of truth.
///
/// # Errors
///
/// Returns [`SettlementError::AllowanceExceeded`] when `already_spent + amount`
/// exceeds the permission's allowance.
pub fn check_allowance(
    permission: &SpendPermission,
    already_spent: U160,
    amount: U160,
) -> Result<(), SettlementError> {
    let remaining = permission.allowance.saturating_sub(already_spent);
    if amount > remaining {
        return Err(SettlementError::AllowanceExceeded {
            requested: U256::from(amount),
            remaining: U256::from(remaining),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn permission() -> SpendPermission {
        SpendPermission {
            account: Address::repeat_byte(0xAA),
            spender: Address::repeat_byte(0xBB),
            token: Address::repeat_byte(0xCC),
            allowance: U160::from(1_000u64),
            period: 86_400,
            start: 0,
            end: crate::permission::MAX_UINT48,
            salt: U256::ZERO,
            extra_data: Bytes::new(),
        }
    }

    #[test]
    fn test_spend_within_allowance() {
        assert!(check_allowance(&permission(), U160::from(400u64), U160::from(600u64)).is_ok());
    }

    #[test]
    fn test_spend_over_allowance() {
        let err =
            check_allowance(&permission(), U160::from(400u64), U160::from(601u64)).unwrap_err();
        assert_eq!(
            err,
            SettlementError::AllowanceExceeded {
                requested: U256::from(601u64),
                remaining: U256::from(600u64),
            }
        );
    }

    #[test]
    fn test_overspent_period_leaves_nothing() {
        let err =
            check_allowance(&permission(), U160::from(5_000u64), U160::from(1u64)).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::AllowanceExceeded { remaining, .. } if remaining == U256::ZERO
        ));
    }
}
