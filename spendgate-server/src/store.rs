//! Postgres-backed [`PermissionStore`].
//!
//! Uniqueness of `(account, spender, token, salt)` is enforced by the table's
//! unique constraint, so concurrent submissions of the same key race safely:
//! the loser reads back the winner's row and compares it field for field.

use std::time::Duration;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use spendgate::store::conflict_message;
use spendgate::{
    BoxFuture, PermissionKey, PermissionStore, SpendPermission, StorageError, StoredPermission,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const INSERT: &str = r"
    INSERT INTO spend_permissions
        (account, spender, token, allowance, period, start_time, end_time, salt, extra_data)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT ON CONSTRAINT spend_permissions_key DO NOTHING
    RETURNING id, account, spender, token, allowance, period, start_time, end_time, salt, extra_data, created_at
";

const SELECT_BY_KEY: &str = r"
    SELECT id, account, spender, token, allowance, period, start_time, end_time, salt, extra_data, created_at
    FROM spend_permissions
    WHERE account = $1 AND spender = $2 AND token = $3 AND salt = $4
";

/// A [`PermissionStore`] persisting grants in Postgres.
#[derive(Debug, Clone)]
pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and applies pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConnectionFailure`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(storage_error)?;

        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::ConnectionFailure(format!("Failed to run migrations: {e}")))?;
        tracing::info!("Database migrations completed");

        Ok(Self::new(pool))
    }

    async fn insert(&self, permission: &SpendPermission) -> Result<StoredPermission, StorageError> {
        let row = PermissionRow::from_permission(permission)?;
        let inserted = sqlx::query_as::<_, PermissionRow>(INSERT)
            .bind(&row.account)
            .bind(&row.spender)
            .bind(&row.token)
            .bind(&row.allowance)
            .bind(row.period)
            .bind(row.start_time)
            .bind(row.end_time)
            .bind(&row.salt)
            .bind(&row.extra_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        if let Some(inserted) = inserted {
            return inserted.into_stored();
        }

        let key = permission.key();
        let existing = self.select(&key).await?.ok_or_else(|| {
            StorageError::ConnectionFailure(format!(
                "Spend permission {key} conflicted but could not be read back"
            ))
        })?;
        if existing.permission == *permission {
            tracing::debug!(id = existing.id, %key, "Identical spend permission already stored");
            Ok(existing)
        } else {
            Err(StorageError::ConstraintViolation(conflict_message(&key)))
        }
    }

    async fn select(&self, key: &PermissionKey) -> Result<Option<StoredPermission>, StorageError> {
        sqlx::query_as::<_, PermissionRow>(SELECT_BY_KEY)
            .bind(address_column(&key.account))
            .bind(address_column(&key.spender))
            .bind(address_column(&key.token))
            .bind(key.salt.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?
            .map(PermissionRow::into_stored)
            .transpose()
    }
}

impl PermissionStore for PgPermissionStore {
    fn create<'a>(
        &'a self,
        permission: &'a SpendPermission,
    ) -> BoxFuture<'a, Result<StoredPermission, StorageError>> {
        Box::pin(self.insert(permission))
    }

    fn find<'a>(
        &'a self,
        key: &'a PermissionKey,
    ) -> BoxFuture<'a, Result<Option<StoredPermission>, StorageError>> {
        Box::pin(self.select(key))
    }
}

/// One row of `spend_permissions`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
struct PermissionRow {
    id: i64,
    account: String,
    spender: String,
    token: String,
    allowance: String,
    period: i64,
    start_time: i64,
    end_time: i64,
    salt: String,
    extra_data: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl PermissionRow {
    fn from_permission(permission: &SpendPermission) -> Result<Self, StorageError> {
        Ok(Self {
            id: 0,
            account: address_column(&permission.account),
            spender: address_column(&permission.spender),
            token: address_column(&permission.token),
            allowance: permission.allowance.to_string(),
            period: timestamp_column("period", permission.period)?,
            start_time: timestamp_column("start", permission.start)?,
            end_time: timestamp_column("end", permission.end)?,
            salt: permission.salt.to_string(),
            extra_data: permission.extra_data.to_vec(),
            created_at: DateTime::<Utc>::default(),
        })
    }

    fn into_stored(self) -> Result<StoredPermission, StorageError> {
        let corrupt = |column: &str| {
            StorageError::ConnectionFailure(format!(
                "Stored spend permission {} has a corrupt {column} column",
                self.id
            ))
        };
        let permission = SpendPermission {
            account: self.account.parse().map_err(|_| corrupt("account"))?,
            spender: self.spender.parse().map_err(|_| corrupt("spender"))?,
            token: self.token.parse().map_err(|_| corrupt("token"))?,
            allowance: self.allowance.parse().map_err(|_| corrupt("allowance"))?,
            period: u64::try_from(self.period).map_err(|_| corrupt("period"))?,
            start: u64::try_from(self.start_time).map_err(|_| corrupt("start_time"))?,
            end: u64::try_from(self.end_time).map_err(|_| corrupt("end_time"))?,
            salt: self.salt.parse().map_err(|_| corrupt("salt"))?,
            extra_data: self.extra_data.clone().into(),
        };
        Ok(StoredPermission {
            id: self.id,
            permission,
            created_at: self.created_at,
        })
    }
}

/// Canonical (lowercase) column form of an address.
fn address_column(address: &Address) -> String {
    address.to_string().to_lowercase()
}

fn timestamp_column(field: &str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| {
        StorageError::ConstraintViolation(format!("Spend permission {field} is out of range"))
    })
}

/// Maps a driver error onto the store's error taxonomy.
fn storage_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            StorageError::ConstraintViolation(db.message().to_owned())
        }
        _ => {
            tracing::warn!(error = %err, "Spend permission store failed");
            StorageError::ConnectionFailure(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::aliases::U160;
    use alloy_primitives::{Bytes, U256};

    fn permission() -> SpendPermission {
        SpendPermission {
            account: Address::repeat_byte(0xAA),
            spender: Address::repeat_byte(0xBB),
            token: spendgate::permission::NATIVE_TOKEN,
            allowance: U160::MAX,
            period: 86_400,
            start: 1_700_000_000,
            end: spendgate::permission::MAX_UINT48,
            salt: U256::MAX,
            extra_data: Bytes::from_static(&[0xca, 0xfe]),
        }
    }

    #[test]
    fn test_row_preserves_full_width_values() {
        let permission = permission();
        let row = PermissionRow::from_permission(&permission).unwrap();
        assert_eq!(row.token, "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee");
        assert_eq!(row.salt, U256::MAX.to_string());
        assert_eq!(row.end_time, 281_474_976_710_655);

        let stored = PermissionRow { id: 7, ..row }.into_stored().unwrap();
        assert_eq!(stored.id, 7);
        assert_eq!(stored.permission, permission);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let mut row = PermissionRow::from_permission(&permission()).unwrap();
        row.allowance = "-1".into();
        let err = row.into_stored().unwrap_err();
        assert!(matches!(err, StorageError::ConnectionFailure(ref m) if m.contains("allowance")));
    }

    #[test]
    fn test_unreachable_database_is_connection_failure() {
        let err = storage_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::ConnectionFailure(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let err = PgPermissionStore::connect("postgres://spendgate@127.0.0.1:1/spendgate", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ConnectionFailure(_)));
    }
}
