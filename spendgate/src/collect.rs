//! The spend-permission collection flow.
//!
//! [`Collector::collect`] drives a request through
//! `Received -> Validated -> Stored -> {Settled | SettlementSkipped}`:
//!
//! 1. **Received** - a missing permission or signature short-circuits.
//! 2. **Validated** - the [validator](crate::validate) runs; when an executor is
//!    configured the permission must also name the executor's spender.
//! 3. **Stored** - the grant is persisted (idempotently) in the record store.
//! 4. **Settled** - with an executor, `approve` runs and the confirmed
//!    [`SettlementResult`] is returned. Without one, settlement is skipped
//!    and only storage is acknowledged.
//!
//! [`Collector::collect_and_spend`] follows the same steps but settles with one
//! batched operation that approves the grant and spends from it.
//!
//! Settlement failures are reported as [`CollectError::Settlement`] after the
//! grant is stored, so the caller can safely resubmit the same request to
//! retry settlement alone.

use std::sync::Arc;

use alloy_primitives::aliases::U160;
use serde_json::Value;

use crate::error::{CollectError, ValidationError};
use crate::permission::{PermissionKey, PermissionSignature, SpendPermission};
use crate::settlement::{SettlementExecutor, SettlementResult};
use crate::store::{PermissionStore, StoredPermission};
use crate::validate::{parse_amount, validate};

/// Successful outcome of [`Collector::collect`].
#[derive(Debug, Clone)]
pub enum CollectOutcome {
    /// The grant was stored; no settlement was attempted.
    SettlementSkipped {
        /// The stored record.
        record: StoredPermission,
    },
    /// The grant was stored and approved on-chain.
    Settled {
        /// The stored record.
        record: StoredPermission,
        /// The confirmed approval.
        result: SettlementResult,
        /// Block-explorer link for the approval transaction.
        explorer_url: Option<String>,
    },
}

impl CollectOutcome {
    /// The stored record, regardless of settlement.
    #[must_use]
    pub const fn record(&self) -> &StoredPermission {
        match self {
            Self::SettlementSkipped { record } | Self::Settled { record, .. } => record,
        }
    }
}

/// Orchestrates validation, storage and settlement of spend permissions.
///
/// Holds no mutable state of its own; each call is independent.
#[derive(Clone)]
pub struct Collector {
    store: Arc<dyn PermissionStore>,
    executor: Option<Arc<dyn SettlementExecutor>>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("settlement_enabled", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Creates a collector that stores grants without settling them.
    #[must_use]
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            executor: None,
        }
    }

    /// Enables on-chain settlement through `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn SettlementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Whether collected grants are settled on-chain.
    #[must_use]
    pub const fn settlement_enabled(&self) -> bool {
        self.executor.is_some()
    }

    /// Validates, stores and (when enabled) approves a spend permission.
    ///
    /// # Errors
    ///
    /// - [`CollectError::Validation`] before anything is stored
    /// - [`CollectError::Storage`] if the record store fails
    /// - [`CollectError::Settlement`] if approval fails after storage
    pub async fn collect(
        &self,
        permission: Option<&Value>,
        signature: Option<&Value>,
    ) -> Result<CollectOutcome, CollectError> {
        let (permission, signature) = self.admit(permission, signature)?;
        let record = self.persist(&permission).await?;

        let Some(executor) = &self.executor else {
            return Ok(CollectOutcome::SettlementSkipped { record });
        };

        let result = executor.approve(&permission, &signature).await?;
        let explorer_url = executor.explorer_url(&result.transaction_hash);

        #[cfg(feature = "telemetry")]
        tracing::info!(
            id = record.id,
            tx = %result.transaction_hash,
            user_op = %result.user_operation_hash,
            "Spend permission approved on-chain"
        );

        Ok(CollectOutcome::Settled {
            record,
            result,
            explorer_url,
        })
    }

    /// Validates and stores a spend permission, then approves it and spends
    /// `amount` from it in a single on-chain operation.
    ///
    /// Nothing is stored when settlement is disabled.
    ///
    /// # Errors
    ///
    /// - [`CollectError::Validation`] before anything is stored
    /// - [`CollectError::SettlementDisabled`] if no executor is configured
    /// - [`CollectError::Storage`] if the record store fails
    /// - [`CollectError::Settlement`] if the batched operation fails after storage
    pub async fn collect_and_spend(
        &self,
        permission: Option<&Value>,
        signature: Option<&Value>,
        amount: &Value,
    ) -> Result<CollectOutcome, CollectError> {
        let (permission, signature) = self.admit(permission, signature)?;
        let amount = parse_amount(amount)?;
        let executor = self
            .executor
            .as_ref()
            .ok_or(CollectError::SettlementDisabled)?;
        let record = self.persist(&permission).await?;

        let result = executor
            .approve_and_spend(&permission, &signature, amount)
            .await?;
        let explorer_url = executor.explorer_url(&result.transaction_hash);

        #[cfg(feature = "telemetry")]
        tracing::info!(
            id = record.id,
            amount = %amount,
            tx = %result.transaction_hash,
            user_op = %result.user_operation_hash,
            "Spend permission approved and spent on-chain"
        );

        Ok(CollectOutcome::Settled {
            record,
            result,
            explorer_url,
        })
    }

    /// Looks up a stored grant.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::NotFound`] for an unknown key and
    /// [`CollectError::Storage`] if the store fails.
    pub async fn find(&self, key: &PermissionKey) -> Result<StoredPermission, CollectError> {
        self.store.find(key).await?.ok_or(CollectError::NotFound)
    }

    fn admit(
        &self,
        permission: Option<&Value>,
        signature: Option<&Value>,
    ) -> Result<(SpendPermission, PermissionSignature), CollectError> {
        let (permission, signature) = validate(permission, signature)?;

        if let Some(executor) = &self.executor {
            let expected = executor.spender_address();
            if permission.spender != expected {
                return Err(ValidationError::SpenderMismatch {
                    expected: expected.to_string(),
                    actual: permission.spender.to_string(),
                }
                .into());
            }
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!(key = %permission.key(), "Spend permission validated");

        Ok((permission, signature))
    }

    async fn persist(&self, permission: &SpendPermission) -> Result<StoredPermission, CollectError> {
        let record = self.store.create(permission).await?;

        #[cfg(feature = "telemetry")]
        tracing::info!(id = record.id, key = %permission.key(), "Spend permission stored");

        Ok(record)
    }

    /// Spends `amount` under a previously collected grant.
    ///
    /// Returns the settlement result and its block-explorer URL.
    ///
    /// # Errors
    ///
    /// - [`CollectError::SettlementDisabled`] if no executor is configured
    /// - [`CollectError::NotFound`] if the grant was never collected
    /// - [`CollectError::Settlement`] if the spend is refused or fails
    pub async fn spend(
        &self,
        key: &PermissionKey,
        amount: U160,
    ) -> Result<(SettlementResult, Option<String>), CollectError> {
        let executor = self
            .executor
            .as_ref()
            .ok_or(CollectError::SettlementDisabled)?;
        let record = self.find(key).await?;
        let result = executor.spend(&record.permission, amount).await?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            id = record.id,
            amount = %amount,
            tx = %result.transaction_hash,
            "Spend settled on-chain"
        );

        let explorer_url = executor.explorer_url(&result.transaction_hash);
        Ok((result, explorer_url))
    }
}
