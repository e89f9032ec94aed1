//! Intake validation for spend permissions.
//!
//! [`validate`] turns the loosely-typed JSON a wallet front end produces into
//! a typed [`SpendPermission`] and [`PermissionSignature`], or reports the
//! first problem found. Numeric fields may arrive as JSON integers or as
//! decimal / `0x`-hex strings (`bigint` values are usually stringified
//! client-side); each is range-checked against its Solidity width.
//!
//! The cryptographic signature is *not* checked here. It is verified by the
//! `SpendPermissionManager` contract when the permission is approved on-chain,
//! so a well-formed but wrong signature surfaces at settlement time.

use std::str::FromStr;

use alloy_primitives::aliases::{U48, U160};
use alloy_primitives::{Address, Bytes, U256, Uint};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::permission::{MAX_UINT48, PermissionKey, PermissionSignature, SpendPermission};

/// Validates a spend permission and its signature.
///
/// Absent and `null` values are both treated as missing. The permission is
/// checked before the signature.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered.
pub fn validate(
    permission: Option<&Value>,
    signature: Option<&Value>,
) -> Result<(SpendPermission, PermissionSignature), ValidationError> {
    let permission = present(permission).ok_or(ValidationError::MissingPermission)?;
    let signature = present(signature).ok_or(ValidationError::MissingSignature)?;
    let permission = parse_permission(permission)?;
    let signature = parse_signature(signature)?;
    Ok((permission, signature))
}

/// Parses a spend permission object.
///
/// `end` defaults to the largest `uint48` and `extraData` to empty bytes.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the offending field.
pub fn parse_permission(value: &Value) -> Result<SpendPermission, ValidationError> {
    let object = value
        .as_object()
        .ok_or(ValidationError::MalformedPermission)?;

    let account = parse_address("account", required(object, "account")?)?;
    let spender = parse_address("spender", required(object, "spender")?)?;
    let token = parse_address("token", required(object, "token")?)?;
    let allowance: U160 = parse_uint("allowance", required(object, "allowance")?)?;
    let period = parse_u48("period", required(object, "period")?)?;
    let start = parse_u48("start", required(object, "start")?)?;
    let end = match optional(object, "end") {
        Some(value) => parse_u48("end", value)?,
        None => MAX_UINT48,
    };
    let salt: U256 = parse_uint("salt", required(object, "salt")?)?;
    let extra_data = match optional(object, "extraData") {
        Some(value) => parse_bytes("extraData", value)?,
        None => Bytes::new(),
    };

    if account.is_zero() {
        return Err(ValidationError::MalformedAddress("account"));
    }
    if spender.is_zero() {
        return Err(ValidationError::MalformedAddress("spender"));
    }
    if period == 0 {
        return Err(ValidationError::MalformedAmount("period"));
    }
    if end <= start {
        return Err(ValidationError::InvalidWindow);
    }

    Ok(SpendPermission {
        account,
        spender,
        token,
        allowance,
        period,
        start,
        end,
        salt,
        extra_data,
    })
}

/// Parses the unique key (`account`, `spender`, `token`, `salt`) of a grant.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the offending field.
pub fn parse_key(value: &Value) -> Result<PermissionKey, ValidationError> {
    let object = value
        .as_object()
        .ok_or(ValidationError::MalformedPermission)?;
    Ok(PermissionKey {
        account: parse_address("account", required(object, "account")?)?,
        spender: parse_address("spender", required(object, "spender")?)?,
        token: parse_address("token", required(object, "token")?)?,
        salt: parse_uint("salt", required(object, "salt")?)?,
    })
}

/// Parses a spend request: a grant key plus a non-zero `amount`.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the offending field.
pub fn parse_spend(value: &Value) -> Result<(PermissionKey, U160), ValidationError> {
    let key = parse_key(value)?;
    let amount = value
        .get("amount")
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField("amount"))?;
    Ok((key, parse_amount(amount)?))
}

/// Parses a non-zero spend `amount`.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedAmount`] for `"amount"` if the value is
/// zero or not a `uint160`.
pub fn parse_amount(value: &Value) -> Result<U160, ValidationError> {
    let amount: U160 = parse_uint("amount", value)?;
    if amount.is_zero() {
        return Err(ValidationError::MalformedAmount("amount"));
    }
    Ok(amount)
}

/// Parses a signature given as a `0x`-prefixed hex string.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedSignature`] if the value is not a hex
/// string of at least [`PermissionSignature::MIN_LEN`] bytes.
pub fn parse_signature(value: &Value) -> Result<PermissionSignature, ValidationError> {
    let s = value
        .as_str()
        .ok_or_else(|| ValidationError::MalformedSignature("expected a hex string".into()))?;
    s.trim().parse()
}

/// Parses an address string.
///
/// All-lowercase and all-uppercase hex are accepted as-is; mixed case must be
/// a valid EIP-55 checksum.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedAddress`] for `field` on any failure.
pub fn parse_address(field: &'static str, value: &Value) -> Result<Address, ValidationError> {
    let malformed = || ValidationError::MalformedAddress(field);
    let s = value.as_str().ok_or_else(malformed)?.trim();
    let hex = s.strip_prefix("0x").ok_or_else(malformed)?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(s, None).map_err(|_| malformed())
    } else {
        Address::from_str(s).map_err(|_| malformed())
    }
}

/// Parses a non-negative integer that must fit in `BITS` bits.
///
/// # Errors
///
/// Returns [`ValidationError::MalformedAmount`] for `field` if the value is
/// negative, fractional, not a number, or out of range.
pub fn parse_uint<const BITS: usize, const LIMBS: usize>(
    field: &'static str,
    value: &Value,
) -> Result<Uint<BITS, LIMBS>, ValidationError> {
    let malformed = || ValidationError::MalformedAmount(field);
    // Number literals keep their source text, so widths past u64 survive.
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_owned(),
        _ => return Err(malformed()),
    };
    let (digits, radix) = match text.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => (hex, 16),
        Some(_) => return Err(malformed()),
        None if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => (text.as_str(), 10),
        None => return Err(malformed()),
    };
    Uint::from_str_radix(digits, radix).map_err(|_| malformed())
}

fn parse_u48(field: &'static str, value: &Value) -> Result<u64, ValidationError> {
    let parsed: U48 = parse_uint(field, value)?;
    Ok(parsed.to::<u64>())
}

fn parse_bytes(field: &'static str, value: &Value) -> Result<Bytes, ValidationError> {
    let malformed = || ValidationError::MalformedBytes(field);
    let s = value.as_str().ok_or_else(malformed)?.trim();
    let hex = s.strip_prefix("0x").ok_or_else(malformed)?;
    alloy_primitives::hex::decode(hex)
        .map(Bytes::from)
        .map_err(|_| malformed())
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn required<'a>(object: &'a Map<String, Value>, field: &'static str) -> Result<&'a Value, ValidationError> {
    optional(object, field).ok_or(ValidationError::MissingField(field))
}

fn optional<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    present(object.get(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn permission_json() -> Value {
        json!({
            "account": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "spender": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
            "token": "0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC",
            "allowance": 1_000_000,
            "period": 86_400,
            "start": 1_700_000_000,
            "salt": 1,
            "extraData": "0x"
        })
    }

    fn signature_json() -> Value {
        Value::String(format!("0x{}1b", "11".repeat(64)))
    }

    #[test]
    fn test_valid_permission() {
        let (permission, signature) =
            validate(Some(&permission_json()), Some(&signature_json())).unwrap();
        assert_eq!(permission.account, Address::repeat_byte(0xAA));
        assert_eq!(permission.spender, Address::repeat_byte(0xBB));
        assert_eq!(permission.token, Address::repeat_byte(0xCC));
        assert_eq!(permission.allowance, U160::from(1_000_000u64));
        assert_eq!(permission.period, 86_400);
        assert_eq!(permission.start, 1_700_000_000);
        assert_eq!(permission.end, MAX_UINT48);
        assert_eq!(permission.salt, U256::from(1u64));
        assert!(permission.extra_data.is_empty());
        assert_eq!(signature.as_bytes().len(), 65);
    }

    #[test]
    fn test_missing_permission_checked_first() {
        assert_eq!(
            validate(None, None).unwrap_err(),
            ValidationError::MissingPermission
        );
        assert_eq!(
            validate(Some(&Value::Null), Some(&signature_json())).unwrap_err(),
            ValidationError::MissingPermission
        );
    }

    #[test]
    fn test_missing_signature() {
        assert_eq!(
            validate(Some(&permission_json()), None).unwrap_err(),
            ValidationError::MissingSignature
        );
    }

    #[test]
    fn test_each_required_field() {
        for field in ["account", "spender", "token", "allowance", "period", "start", "salt"] {
            let mut value = permission_json();
            value.as_object_mut().unwrap().remove(field);
            assert_eq!(
                parse_permission(&value).unwrap_err(),
                ValidationError::MissingField(field),
                "field {field}"
            );
        }
    }

    #[test]
    fn test_negative_allowance_rejected() {
        let mut value = permission_json();
        value["allowance"] = json!(-1);
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("allowance")
        );
        value["allowance"] = json!("-1");
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("allowance")
        );
    }

    #[test]
    fn test_fractional_amount_rejected() {
        let mut value = permission_json();
        value["period"] = json!(1.5);
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("period")
        );
    }

    #[test]
    fn test_amount_wider_than_field_rejected() {
        let mut value = permission_json();
        // 2^48
        value["start"] = json!("281474976710656");
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("start")
        );
        let mut value = permission_json();
        value["allowance"] = json!(format!("0x1{}", "0".repeat(40)));
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("allowance")
        );
    }

    #[test]
    fn test_string_and_hex_amounts_accepted() {
        let mut value = permission_json();
        value["allowance"] = json!("1000000000000000000000");
        value["salt"] = json!("0xff");
        let permission = parse_permission(&value).unwrap();
        assert_eq!(
            permission.allowance,
            U160::from(1_000_000_000_000_000_000_000u128)
        );
        assert_eq!(permission.salt, U256::from(255u64));
    }

    #[test]
    fn test_zero_allowance_accepted() {
        let mut value = permission_json();
        value["allowance"] = json!(0);
        assert_eq!(parse_permission(&value).unwrap().allowance, U160::ZERO);
    }

    #[test]
    fn test_integers_wider_than_u64_accepted() {
        let value: Value = serde_json::from_str(
            r#"{
                "account": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                "spender": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
                "token": "0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC",
                "allowance": 1000000000000000000000,
                "period": 86400,
                "start": 1700000000,
                "salt": 18446744073709551616
            }"#,
        )
        .unwrap();
        let permission = parse_permission(&value).unwrap();
        assert_eq!(
            permission.allowance,
            U160::from(1_000_000_000_000_000_000_000u128)
        );
        assert_eq!(permission.salt, U256::from(1u128 << 64));
    }

    #[test]
    fn test_exponent_literal_rejected() {
        let mut value = permission_json();
        value["allowance"] = serde_json::from_str("1e21").unwrap();
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("allowance")
        );
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut value = permission_json();
        value["period"] = json!(0);
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAmount("period")
        );
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut value = permission_json();
        value["end"] = json!(1_700_000_000);
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::InvalidWindow
        );
    }

    #[test]
    fn test_malformed_addresses() {
        let cases = [
            json!("0x1234"),
            json!("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            json!("0xZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ"),
            json!(42),
            // Mixed case with a broken checksum.
            json!("0xaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaA"),
        ];
        for case in cases {
            let mut value = permission_json();
            value["token"] = case.clone();
            assert_eq!(
                parse_permission(&value).unwrap_err(),
                ValidationError::MalformedAddress("token"),
                "case {case}"
            );
        }
    }

    #[test]
    fn test_checksummed_address_accepted() {
        let mut value = permission_json();
        value["token"] = json!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        assert!(parse_permission(&value).is_ok());
    }

    #[test]
    fn test_zero_spender_rejected() {
        let mut value = permission_json();
        value["spender"] = json!(format!("0x{}", "0".repeat(40)));
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedAddress("spender")
        );
    }

    #[test]
    fn test_malformed_extra_data() {
        let mut value = permission_json();
        value["extraData"] = json!("0xabc");
        assert_eq!(
            parse_permission(&value).unwrap_err(),
            ValidationError::MalformedBytes("extraData")
        );
    }

    #[test]
    fn test_malformed_signature() {
        for sig in [json!(12), json!("0x"), json!("no-prefix"), json!("0x1b")] {
            let err = validate(Some(&permission_json()), Some(&sig)).unwrap_err();
            assert!(matches!(err, ValidationError::MalformedSignature(_)), "{sig}");
        }
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(
            validate(Some(&json!("permission")), Some(&signature_json())).unwrap_err(),
            ValidationError::MalformedPermission
        );
    }

    #[test]
    fn test_spend_request() {
        let (key, amount) = parse_spend(&json!({
            "account": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "spender": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
            "token": "0xCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC",
            "salt": "0x01",
            "amount": "250",
        }))
        .unwrap();
        assert_eq!(key, parse_permission(&permission_json()).unwrap().key());
        assert_eq!(amount, U160::from(250u64));
    }

    #[test]
    fn test_spend_request_requires_positive_amount() {
        let mut request = permission_json();
        assert_eq!(
            parse_spend(&request).unwrap_err(),
            ValidationError::MissingField("amount")
        );
        request["amount"] = json!(0);
        assert_eq!(
            parse_spend(&request).unwrap_err(),
            ValidationError::MalformedAmount("amount")
        );
    }
}
