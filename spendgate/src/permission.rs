//! Spend-permission domain types.
//!
//! [`SpendPermission`] mirrors the on-chain `SpendPermission` struct of the
//! `SpendPermissionManager` contract field for field, in the same order:
//!
//! ```text
//! account, spender, token, allowance (uint160), period (uint48),
//! start (uint48), end (uint48), salt (uint256), extraData (bytes)
//! ```
//!
//! # Serialization
//!
//! Numeric fields are serialized as decimal strings to avoid loss of precision
//! in JSON, since `JavaScript`'s `Number` type cannot safely represent
//! 160- or 256-bit integers.

use std::fmt::{Display, Formatter};

use alloy_primitives::aliases::U160;
use alloy_primitives::{Address, Bytes, U256, address};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// ERC-7528 sentinel address standing in for the chain's native asset.
pub const NATIVE_TOKEN: Address = address!("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Largest value representable by a Solidity `uint48`.
pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// A spend permission grant, as signed by the owner of `account`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendPermission {
    /// Smart account granting the permission (owner of the funds).
    pub account: Address,
    /// Address authorized to pull funds.
    pub spender: Address,
    /// ERC-20 token contract, or [`NATIVE_TOKEN`].
    pub token: Address,
    /// Maximum cumulative amount spendable within one period.
    #[serde(with = "decimal")]
    pub allowance: U160,
    /// Length of the recurring allowance window in seconds.
    #[serde(with = "decimal_u64")]
    pub period: u64,
    /// Unix timestamp at which the permission becomes active (inclusive).
    #[serde(with = "decimal_u64")]
    pub start: u64,
    /// Unix timestamp at which the permission expires (exclusive).
    #[serde(with = "decimal_u64")]
    pub end: u64,
    /// Caller-chosen nonce distinguishing otherwise identical grants.
    #[serde(with = "decimal")]
    pub salt: U256,
    /// Opaque bytes reserved for policy extensions.
    pub extra_data: Bytes,
}

impl SpendPermission {
    /// Returns the unique key `(account, spender, token, salt)` of this grant.
    #[must_use]
    pub const fn key(&self) -> PermissionKey {
        PermissionKey {
            account: self.account,
            spender: self.spender,
            token: self.token,
            salt: self.salt,
        }
    }

    /// Whether `now` lies inside the `[start, end)` validity window.
    #[must_use]
    pub const fn is_active_at(&self, now: u64) -> bool {
        self.start <= now && now < self.end
    }
}

/// The composite key under which a [`SpendPermission`] is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    /// Granting account.
    pub account: Address,
    /// Authorized spender.
    pub spender: Address,
    /// Token contract.
    pub token: Address,
    /// Grant salt.
    #[serde(with = "decimal")]
    pub salt: U256,
}

impl Display for PermissionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.account, self.spender, self.token, self.salt
        )
    }
}

/// Raw signature bytes authorizing a [`SpendPermission`].
///
/// EOA signatures are exactly 65 bytes; smart-wallet signatures (ERC-1271,
/// or ERC-6492 wrapped for undeployed wallets) are longer and are carried
/// through unchanged for on-chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSignature(Bytes);

impl PermissionSignature {
    /// Minimum accepted signature length in bytes.
    pub const MIN_LEN: usize = 65;

    /// Returns the signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Consumes the wrapper and returns the signature bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl TryFrom<Bytes> for PermissionSignature {
    type Error = ValidationError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() < Self::MIN_LEN {
            return Err(ValidationError::MalformedSignature(format!(
                "expected at least {} bytes, got {}",
                Self::MIN_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }
}

impl std::str::FromStr for PermissionSignature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .ok_or_else(|| ValidationError::MalformedSignature("missing 0x prefix".into()))?;
        let bytes = alloy_primitives::hex::decode(hex)
            .map_err(|e| ValidationError::MalformedSignature(e.to_string()))?;
        Self::try_from(Bytes::from(bytes))
    }
}

impl Display for PermissionSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serde helpers rendering `Uint` values as decimal strings.
pub(crate) mod decimal {
    use alloy_primitives::Uint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S, const BITS: usize, const LIMBS: usize>(
        value: &Uint<BITS, LIMBS>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub(crate) fn deserialize<'de, D, const BITS: usize, const LIMBS: usize>(
        deserializer: D,
    ) -> Result<Uint<BITS, LIMBS>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uint::from_str_radix(&s, 10).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers rendering `u64` values as decimal strings.
pub(crate) mod decimal_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map_err(|_| serde::de::Error::custom("value must be a non-negative integer"))
    }
}
