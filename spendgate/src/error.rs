//! Error taxonomy for spend-permission collection.
//!
//! Each stage of the collection flow has its own error type:
//!
//! - [`ValidationError`] - the request is malformed; terminal, reported to the caller
//! - [`StorageError`] - the record store failed; terminal, reported with the store's message
//! - [`SettlementError`] - on-chain settlement failed; reported distinctly so the
//!   caller can retry settlement without re-submitting the permission
//!
//! [`CollectError`] unifies them for the collection orchestrator.

use std::fmt;
use std::time::Duration;

use alloy_primitives::{B256, TxHash, U256};

/// A grant or its signature failed intake validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The request carried no spend permission.
    #[error("Spend permission is required")]
    MissingPermission,
    /// The request carried no signature.
    #[error("Signature is required")]
    MissingSignature,
    /// The spend permission is not a JSON object.
    #[error("Spend permission must be an object")]
    MalformedPermission,
    /// A required field is absent or `null`.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// An address field is not a well-formed account identifier.
    #[error("Malformed address in field: {0}")]
    MalformedAddress(&'static str),
    /// A numeric field is negative, fractional, or wider than its on-chain type.
    #[error("Malformed amount in field: {0}")]
    MalformedAmount(&'static str),
    /// A bytes field is not hex encoded.
    #[error("Malformed bytes in field: {0}")]
    MalformedBytes(&'static str),
    /// The signature is not a byte string of acceptable length.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
    /// The permission expires at or before it starts.
    #[error("Permission end must be after start")]
    InvalidWindow,
    /// The permission names a spender other than this service's spender account.
    #[error("Permission spender {actual} does not match service spender {expected}")]
    SpenderMismatch {
        /// Address of the configured spender account.
        expected: String,
        /// Address named in the permission.
        actual: String,
    },
}

/// The record store failed.
///
/// The display form is exactly the underlying store message, which is what
/// the collection endpoint reports back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The store could not be reached or the query failed in transit.
    #[error("{0}")]
    ConnectionFailure(String),
    /// A uniqueness or integrity constraint rejected the write.
    #[error("{0}")]
    ConstraintViolation(String),
}

/// Which step of settlement an error originated from.
///
/// Retries should restart at the failing phase: a [`Submission`](Self::Submission)
/// failure never reached the chain, while a [`Confirmation`](Self::Confirmation)
/// failure may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SettlementPhase {
    /// Local and on-chain checks before anything is submitted.
    Preflight,
    /// Building, sponsoring, signing and enqueueing the user operation.
    Submission,
    /// Waiting for the enqueued user operation to be included.
    Confirmation,
}

impl fmt::Display for SettlementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preflight => write!(f, "preflight"),
            Self::Submission => write!(f, "submission"),
            Self::Confirmation => write!(f, "confirmation"),
        }
    }
}

/// On-chain settlement failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// The paymaster declined to sponsor gas for the user operation.
    #[error("Paymaster rejected sponsorship: {0}")]
    SponsorshipRejected(String),
    /// The bundler refused to accept the user operation.
    #[error("Bundler rejected user operation: {0}")]
    SubmissionRejected(String),
    /// The user operation was included but its execution reverted.
    #[error("User operation {user_operation_hash} reverted on-chain")]
    OnChainRevert {
        /// Hash of the reverted user operation.
        user_operation_hash: B256,
        /// Hash of the bundle transaction that included it, if reported.
        transaction_hash: Option<TxHash>,
        /// Revert reason reported by the bundler, if any.
        reason: Option<String>,
    },
    /// The user operation was not confirmed within the bounded wait.
    #[error("Timed out after {waited:?} waiting for user operation {user_operation_hash}")]
    Timeout {
        /// Hash of the pending user operation.
        user_operation_hash: B256,
        /// How long confirmation was awaited.
        waited: Duration,
    },
    /// The spend would exceed what remains of the current period's allowance.
    #[error("Requested amount {requested} exceeds remaining allowance {remaining}")]
    AllowanceExceeded {
        /// Amount asked for.
        requested: U256,
        /// Allowance left in the current period.
        remaining: U256,
    },
    /// The permission has not been approved on-chain.
    #[error("Spend permission is not approved on-chain")]
    NotApproved,
    /// The account revoked the permission; it can no longer be approved or spent.
    #[error("Spend permission has been revoked")]
    Revoked,
    /// The permission is outside its `[start, end)` validity window.
    #[error("Spend permission is not active at {now} (window {start}..{end})")]
    Inactive {
        /// Current unix time.
        now: u64,
        /// Permission start.
        start: u64,
        /// Permission end.
        end: u64,
    },
    /// An RPC call to the chain or bundler failed.
    #[error("Chain error during {phase}: {message}")]
    Chain {
        /// Phase in which the call failed.
        phase: SettlementPhase,
        /// Underlying error message.
        message: String,
    },
}

impl SettlementError {
    /// Creates a [`SettlementError::Chain`] error for the given phase.
    pub fn chain(phase: SettlementPhase, message: impl fmt::Display) -> Self {
        Self::Chain {
            phase,
            message: message.to_string(),
        }
    }

    /// Returns the settlement phase this error originated from.
    #[must_use]
    pub const fn phase(&self) -> SettlementPhase {
        match self {
            Self::AllowanceExceeded { .. }
            | Self::NotApproved
            | Self::Revoked
            | Self::Inactive { .. } => SettlementPhase::Preflight,
            Self::SponsorshipRejected(_) | Self::SubmissionRejected(_) => {
                SettlementPhase::Submission
            }
            Self::OnChainRevert { .. } | Self::Timeout { .. } => SettlementPhase::Confirmation,
            Self::Chain { phase, .. } => *phase,
        }
    }
}

/// Errors produced by the [`Collector`](crate::collect::Collector).
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The request failed validation; nothing was stored.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The record store failed; nothing was settled.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The permission was stored but settlement failed.
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    /// No stored permission matches the requested key.
    #[error("Spend permission not found")]
    NotFound,
    /// Settlement was requested but no executor is configured.
    #[error("Settlement is disabled")]
    SettlementDisabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_messages_match_wire_contract() {
        assert_eq!(
            ValidationError::MissingPermission.to_string(),
            "Spend permission is required"
        );
        assert_eq!(
            ValidationError::MissingSignature.to_string(),
            "Signature is required"
        );
    }

    #[test]
    fn test_storage_error_displays_raw_message() {
        let err = StorageError::ConnectionFailure("connection refused".into());
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_settlement_phases() {
        assert_eq!(
            SettlementError::SponsorshipRejected("no".into()).phase(),
            SettlementPhase::Submission
        );
        assert_eq!(
            SettlementError::Timeout {
                user_operation_hash: B256::ZERO,
                waited: Duration::from_secs(60),
            }
            .phase(),
            SettlementPhase::Confirmation
        );
        assert_eq!(
            SettlementError::Timeout {
                user_operation_hash: B256::ZERO,
                waited: Duration::from_millis(250),
            }
            .to_string(),
            format!("Timed out after 250ms waiting for user operation {}", B256::ZERO)
        );
        assert_eq!(
            SettlementError::chain(SettlementPhase::Preflight, "boom").phase(),
            SettlementPhase::Preflight
        );
        assert_eq!(SettlementError::NotApproved.phase(), SettlementPhase::Preflight);
    }
}
