//! Error types for the smart-account spender.
//!
//! Failures while settling map onto [`SettlementError`] according to where
//! they came from: a paymaster refusal is a sponsorship rejection, a bundler
//! refusal is a submission rejection, and anything that failed in transit is a
//! [`SettlementError::Chain`] error tagged with its phase.

use alloy_transport::TransportError;
use spendgate::{SettlementError, SettlementPhase};

use crate::bundler::BundlerError;

/// Errors that can occur while setting up a [`SmartSpender`](crate::SmartSpender).
#[derive(Debug, thiserror::Error)]
pub enum SpenderError {
    /// Deriving the spender's smart account address failed.
    #[error("Failed to derive spender account: {0}")]
    AccountDerivation(#[source] alloy_contract::Error),
    /// The configured private key could not be parsed.
    #[error("Invalid spender private key: {0}")]
    InvalidKey(String),
}

/// Maps a paymaster failure into a [`SettlementError`].
pub(crate) fn from_paymaster(err: BundlerError) -> SettlementError {
    match err {
        BundlerError::Rpc { message, .. } => SettlementError::SponsorshipRejected(message),
        other => SettlementError::chain(SettlementPhase::Submission, other),
    }
}

/// Maps a bundler failure during submission into a [`SettlementError`].
pub(crate) fn from_bundler(err: BundlerError) -> SettlementError {
    match err {
        BundlerError::Rpc { message, .. } => SettlementError::SubmissionRejected(message),
        other => SettlementError::chain(SettlementPhase::Submission, other),
    }
}

/// Maps a chain RPC failure into a [`SettlementError`] for `phase`.
pub(crate) fn from_transport(phase: SettlementPhase, err: TransportError) -> SettlementError {
    SettlementError::chain(phase, err)
}

/// Maps a contract read failure into a [`SettlementError`] for `phase`.
pub(crate) fn from_contract(phase: SettlementPhase, err: alloy_contract::Error) -> SettlementError {
    SettlementError::chain(phase, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection() -> BundlerError {
        BundlerError::Rpc {
            method: "pm_getPaymasterStubData",
            code: -32002,
            message: "policy rejected".into(),
        }
    }

    #[test]
    fn test_paymaster_rejection_is_sponsorship_rejected() {
        assert_eq!(
            from_paymaster(rejection()),
            SettlementError::SponsorshipRejected("policy rejected".into())
        );
    }

    #[test]
    fn test_bundler_rejection_is_submission_rejected() {
        assert_eq!(
            from_bundler(rejection()),
            SettlementError::SubmissionRejected("policy rejected".into())
        );
    }

    #[test]
    fn test_empty_result_is_chain_error_in_submission() {
        let err = from_bundler(BundlerError::EmptyResult("eth_sendUserOperation"));
        assert_eq!(err.phase(), SettlementPhase::Submission);
        assert!(matches!(err, SettlementError::Chain { .. }));
    }
}
