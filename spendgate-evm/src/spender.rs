//! Settlement from a Coinbase Smart Wallet spender via ERC-4337.
//!
//! The spender account is a smart wallet owned by a single EOA key. Every
//! settlement call is wrapped in `execute` (or `executeBatch`) on that wallet
//! and submitted to a bundler as a v0.6 user operation, optionally sponsored
//! by an ERC-7677 paymaster.
//!
//! Settlement is two-phase and both phases are exposed:
//!
//! 1. [`SmartSpender::submit`] builds, sponsors, signs and enqueues the
//!    operation, returning its user operation hash.
//! 2. [`SmartSpender::wait_for_receipt`] polls the bundler until the operation
//!    is included or the bounded wait elapses.
//!
//! Each submission draws a fresh 192-bit nonce key, so concurrent settlements
//! never contend for the same sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::aliases::{U160, U192};
use alloy_primitives::{Address, B256, Bytes, TxHash, U256, keccak256};
use alloy_provider::Provider;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolValue};
use spendgate::BoxFuture;
use spendgate::settlement::{SettlementExecutor, SettlementResult, check_allowance};
use spendgate::{PermissionSignature, SettlementError, SettlementPhase, SpendPermission};

use crate::bundler::BundlerClient;
use crate::contract::{
    ICoinbaseSmartWallet, ICoinbaseSmartWalletFactory, IEntryPoint, ISpendPermissionManager,
    SignatureWrapper,
};
use crate::error::{SpenderError, from_bundler, from_contract, from_paymaster, from_transport};
use crate::networks::NetworkConfig;
use crate::user_operation::UserOperation;

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

/// Placeholder ECDSA signature used while estimating gas.
const STUB_ECDSA_SIGNATURE: [u8; 65] = {
    let mut sig = [0xff; 65];
    sig[64] = 0x1c;
    sig
};

/// A [`SettlementExecutor`] backed by a Coinbase Smart Wallet spender.
pub struct SmartSpender<P> {
    provider: P,
    network: NetworkConfig,
    signer: PrivateKeySigner,
    account: Address,
    bundler: BundlerClient,
    paymaster: Option<BundlerClient>,
    receipt_timeout: Duration,
    poll_interval: Duration,
    submissions: AtomicU64,
}

impl<P> std::fmt::Debug for SmartSpender<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartSpender")
            .field("network", &self.network.network)
            .field("account", &self.account)
            .field("owner", &self.signer.address())
            .field("bundler", &self.bundler.url().as_str())
            .field("sponsored", &self.paymaster.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: Provider> SmartSpender<P> {
    /// Default bound on how long [`Self::wait_for_receipt`] polls.
    pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default delay between receipt polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Creates a spender for a known smart account address.
    pub fn new(
        provider: P,
        network: NetworkConfig,
        signer: PrivateKeySigner,
        account: Address,
        bundler: BundlerClient,
    ) -> Self {
        Self {
            provider,
            network,
            signer,
            account,
            bundler,
            paymaster: None,
            receipt_timeout: Self::DEFAULT_RECEIPT_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            submissions: AtomicU64::new(0),
        }
    }

    /// Creates a spender whose account is the counterfactual smart wallet
    /// owned solely by `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`SpenderError::AccountDerivation`] if the factory lookup fails.
    pub async fn connect(
        provider: P,
        network: NetworkConfig,
        signer: PrivateKeySigner,
        bundler: BundlerClient,
    ) -> Result<Self, SpenderError> {
        let factory = ICoinbaseSmartWalletFactory::new(network.wallet_factory, &provider);
        let account = factory
            .getAddress(owners(&signer), U256::ZERO)
            .call()
            .await
            .map_err(SpenderError::AccountDerivation)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(%account, owner = %signer.address(), network = %network.network, "derived spender account");

        Ok(Self::new(provider, network, signer, account, bundler))
    }

    /// Routes gas sponsorship through an ERC-7677 paymaster.
    #[must_use]
    pub fn with_paymaster(mut self, paymaster: BundlerClient) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    /// Sets the bound on receipt polling.
    #[must_use]
    pub const fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Sets the delay between receipt polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The network this spender settles on.
    #[must_use]
    pub const fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Builds, sponsors, signs and enqueues a user operation executing
    /// `call_data` on the spender account.
    ///
    /// # Errors
    ///
    /// Returns a [`SettlementError`] in the [`SettlementPhase::Submission`] phase.
    pub async fn submit(&self, call_data: Bytes) -> Result<B256, SettlementError> {
        let entry_point = self.network.entry_point;
        let chain_id = self.network.chain_id;

        let mut op = UserOperation {
            sender: self.account,
            nonce: self.next_nonce(&call_data).await?,
            init_code: self.init_code().await?,
            call_data,
            call_gas_limit: U256::ZERO,
            verification_gas_limit: U256::ZERO,
            pre_verification_gas: U256::ZERO,
            max_fee_per_gas: U256::ZERO,
            max_priority_fee_per_gas: U256::ZERO,
            paymaster_and_data: Bytes::new(),
            signature: wrap_signature(&STUB_ECDSA_SIGNATURE),
        };
        let (max_fee, max_priority_fee) = self.fees().await?;
        op.max_fee_per_gas = max_fee;
        op.max_priority_fee_per_gas = max_priority_fee;

        let mut sponsorship_final = true;
        if let Some(paymaster) = &self.paymaster {
            let stub = paymaster
                .paymaster_stub_data(&op, entry_point, chain_id)
                .await
                .map_err(from_paymaster)?;
            op.paymaster_and_data = stub.paymaster_and_data;
            sponsorship_final = stub.is_final;
        }

        let gas = self
            .bundler
            .estimate_user_operation_gas(&op, entry_point)
            .await
            .map_err(from_bundler)?;
        op.apply_gas(&gas);

        if let Some(paymaster) = self.paymaster.as_ref().filter(|_| !sponsorship_final) {
            op.paymaster_and_data = paymaster
                .paymaster_data(&op, entry_point, chain_id)
                .await
                .map_err(from_paymaster)?
                .paymaster_and_data;
        }

        let hash = op.hash(entry_point, chain_id);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| SettlementError::chain(SettlementPhase::Submission, e))?;
        op.signature = wrap_signature(&signature.as_bytes());

        let user_operation_hash = traced!(
            self.bundler.send_user_operation(&op, entry_point),
            tracing::info_span!("send_user_operation",
                sender = %op.sender,
                nonce = %op.nonce,
                otel.kind = "client",
            )
        )
        .map_err(from_bundler)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(%user_operation_hash, sender = %op.sender, "user operation enqueued");

        Ok(user_operation_hash)
    }

    /// Polls the bundler until `user_operation_hash` is included.
    ///
    /// Transient lookup failures are retried until the bounded wait elapses.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::Timeout`] when the wait elapses and
    /// [`SettlementError::OnChainRevert`] when execution reverted.
    pub async fn wait_for_receipt(
        &self,
        user_operation_hash: B256,
    ) -> Result<SettlementResult, SettlementError> {
        let poll = async {
            loop {
                match self
                    .bundler
                    .get_user_operation_receipt(user_operation_hash)
                    .await
                {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    #[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
                    Err(err) => {
                        #[cfg(feature = "telemetry")]
                        tracing::warn!(%user_operation_hash, error = %err, "receipt lookup failed, retrying");
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(self.receipt_timeout, poll)
            .await
            .map_err(|_| SettlementError::Timeout {
                user_operation_hash,
                waited: self.receipt_timeout,
            })?;

        let transaction_hash = receipt.receipt.transaction_hash;
        if !receipt.success {
            #[cfg(feature = "telemetry")]
            tracing::warn!(%user_operation_hash, %transaction_hash, reason = ?receipt.reason, "user operation reverted");
            return Err(SettlementError::OnChainRevert {
                user_operation_hash,
                transaction_hash: Some(transaction_hash),
                reason: receipt.reason,
            });
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(%user_operation_hash, %transaction_hash, "user operation confirmed");

        Ok(SettlementResult {
            success: true,
            transaction_hash,
            user_operation_hash,
        })
    }

    /// Executes `calls` from the spender account and waits for confirmation.
    async fn execute(
        &self,
        mut calls: Vec<ICoinbaseSmartWallet::Call>,
    ) -> Result<SettlementResult, SettlementError> {
        let call_data = if calls.len() == 1 {
            let call = calls.remove(0);
            ICoinbaseSmartWallet::executeCall {
                target: call.target,
                value: call.value,
                data: call.data,
            }
            .abi_encode()
        } else {
            ICoinbaseSmartWallet::executeBatchCall { calls }.abi_encode()
        };
        let user_operation_hash = self.submit(call_data.into()).await?;
        self.wait_for_receipt(user_operation_hash).await
    }

    fn manager(&self) -> ISpendPermissionManager::ISpendPermissionManagerInstance<&P> {
        ISpendPermissionManager::new(self.network.spend_permission_manager, &self.provider)
    }

    fn manager_call(&self, data: Vec<u8>) -> ICoinbaseSmartWallet::Call {
        ICoinbaseSmartWallet::Call {
            target: self.network.spend_permission_manager,
            value: U256::ZERO,
            data: data.into(),
        }
    }

    async fn ensure_not_revoked(&self, permission: &SpendPermission) -> Result<(), SettlementError> {
        let revoked = self
            .manager()
            .isRevoked(permission.into())
            .call()
            .await
            .map_err(|e| from_contract(SettlementPhase::Preflight, e))?;
        if revoked {
            return Err(SettlementError::Revoked);
        }
        Ok(())
    }

    /// Checks `amount` against the current period and returns nothing if it fits.
    async fn ensure_allowance(
        &self,
        permission: &SpendPermission,
        amount: U160,
    ) -> Result<(), SettlementError> {
        let now = unix_now();
        if !permission.is_active_at(now) {
            return Err(SettlementError::Inactive {
                now,
                start: permission.start,
                end: permission.end,
            });
        }
        let period = self
            .manager()
            .getCurrentPeriod(permission.into())
            .call()
            .await
            .map_err(|e| from_contract(SettlementPhase::Preflight, e))?;
        check_allowance(permission, period.spend, amount)
    }

    /// Draws a nonce under a fresh key: `getNonce(account, key)` is the
    /// sequence for that key, which is zero for an unused one.
    async fn next_nonce(&self, call_data: &Bytes) -> Result<U256, SettlementError> {
        let seq = self.submissions.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let seed = [
            call_data.as_ref(),
            &seq.to_be_bytes(),
            &nanos.to_be_bytes(),
        ]
        .concat();
        let key = U192::from_be_slice(&keccak256(seed)[..24]);

        let entry_point = IEntryPoint::new(self.network.entry_point, &self.provider);
        entry_point
            .getNonce(self.account, key)
            .call()
            .await
            .map_err(|e| from_contract(SettlementPhase::Submission, e))
    }

    /// Factory deployment code, or empty once the account is deployed.
    async fn init_code(&self) -> Result<Bytes, SettlementError> {
        let code = traced!(
            self.provider.get_code_at(self.account).into_future(),
            tracing::info_span!("get_code_at",
                address = %self.account,
                otel.kind = "client",
            )
        )
        .map_err(|e| from_transport(SettlementPhase::Submission, e))?;
        if !code.is_empty() {
            return Ok(Bytes::new());
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(account = %self.account, "spender account not deployed, attaching init code");

        let create = ICoinbaseSmartWalletFactory::createAccountCall {
            owners: owners(&self.signer),
            nonce: U256::ZERO,
        }
        .abi_encode();
        Ok([self.network.wallet_factory.as_slice(), &create].concat().into())
    }

    /// Current `(max_fee_per_gas, max_priority_fee_per_gas)`.
    async fn fees(&self) -> Result<(U256, U256), SettlementError> {
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| from_transport(SettlementPhase::Submission, e))?;
        let priority = self
            .provider
            .get_max_priority_fee_per_gas()
            .await
            .map_err(|e| from_transport(SettlementPhase::Submission, e))?;
        Ok((
            U256::from(gas_price.saturating_add(priority)),
            U256::from(priority),
        ))
    }
}

impl<P: Provider> SettlementExecutor for SmartSpender<P> {
    fn spender_address(&self) -> Address {
        self.account
    }

    fn approve<'a>(
        &'a self,
        permission: &'a SpendPermission,
        signature: &'a PermissionSignature,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>> {
        Box::pin(async move {
            self.ensure_not_revoked(permission).await?;
            let approve = self.manager_call(approve_call_data(permission, signature));
            self.execute(vec![approve]).await
        })
    }

    fn spend<'a>(
        &'a self,
        permission: &'a SpendPermission,
        amount: U160,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>> {
        Box::pin(async move {
            self.ensure_not_revoked(permission).await?;
            let approved = self
                .manager()
                .isApproved(permission.into())
                .call()
                .await
                .map_err(|e| from_contract(SettlementPhase::Preflight, e))?;
            if !approved {
                return Err(SettlementError::NotApproved);
            }
            self.ensure_allowance(permission, amount).await?;
            let spend = self.manager_call(spend_call_data(permission, amount));
            self.execute(vec![spend]).await
        })
    }

    fn approve_and_spend<'a>(
        &'a self,
        permission: &'a SpendPermission,
        signature: &'a PermissionSignature,
        amount: U160,
    ) -> BoxFuture<'a, Result<SettlementResult, SettlementError>> {
        Box::pin(async move {
            self.ensure_not_revoked(permission).await?;
            self.ensure_allowance(permission, amount).await?;
            let approve = self.manager_call(approve_call_data(permission, signature));
            let spend = self.manager_call(spend_call_data(permission, amount));
            self.execute(vec![approve, spend]).await
        })
    }

    fn explorer_url(&self, transaction_hash: &TxHash) -> Option<String> {
        self.network.transaction_url(transaction_hash)
    }
}

/// Smart wallet owner list for a single EOA owner.
fn owners(signer: &PrivateKeySigner) -> Vec<Bytes> {
    vec![signer.address().abi_encode().into()]
}

/// Wraps a raw owner signature in the wallet's `SignatureWrapper` envelope.
fn wrap_signature(raw: &[u8]) -> Bytes {
    SignatureWrapper {
        ownerIndex: U256::ZERO,
        signatureData: Bytes::copy_from_slice(raw),
    }
    .abi_encode()
    .into()
}

fn approve_call_data(permission: &SpendPermission, signature: &PermissionSignature) -> Vec<u8> {
    ISpendPermissionManager::approveWithSignatureCall {
        spendPermission: permission.into(),
        signature: signature.as_bytes().clone(),
    }
    .abi_encode()
}

fn spend_call_data(permission: &SpendPermission, amount: U160) -> Vec<u8> {
    ISpendPermissionManager::spendCall {
        spendPermission: permission.into(),
        value: amount,
    }
    .abi_encode()
}

/// Parses a hex-encoded spender owner key.
///
/// # Errors
///
/// Returns [`SpenderError::InvalidKey`] if `key` is not a valid secp256k1 secret.
pub fn signer_from_key(key: &str) -> Result<PrivateKeySigner, SpenderError> {
    key.trim()
        .parse()
        .map_err(|e: alloy_signer_local::LocalSignerError| SpenderError::InvalidKey(e.to_string()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
