//! Account storage.

use super::{Database, now_ms};
use crate::auth::{AccountStore, StoreError, UniqueField};
use crate::types::{Account, AccountId, AccountUpdate, NewAccount};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

const ACCOUNT_COLUMNS: &str = "id, email, external_id, password_hash, display_name,
     provider_access_token, provider_refresh_token, created_at, updated_at";

fn parse_account_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: AccountId(row.get("id")?),
        email: row.get("email")?,
        external_id: row.get("external_id")?,
        password_hash: row.get("password_hash")?,
        display_name: row.get("display_name")?,
        provider_access_token: row.get("provider_access_token")?,
        provider_refresh_token: row.get("provider_refresh_token")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn get_account_internal(conn: &Connection, id: AccountId) -> Result<Option<Account>> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id.0], parse_account_row)
        .optional()?)
}

/// Classify a SQLite error as a uniqueness violation on a known account column.
///
/// SQLite reports these as `UNIQUE constraint failed: accounts.<column>`.
pub fn unique_violation(err: &anyhow::Error) -> Option<UniqueField> {
    let rusqlite::Error::SqliteFailure(failure, message) = err.downcast_ref::<rusqlite::Error>()?
    else {
        return None;
    };
    if failure.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
        return None;
    }
    let message = message.as_deref().unwrap_or_default();
    if message.contains("accounts.email") {
        Some(UniqueField::Email)
    } else if message.contains("accounts.external_id") {
        Some(UniqueField::ExternalId)
    } else {
        None
    }
}

impl Database {
    /// Get an account by id.
    pub fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.with_conn(|conn| get_account_internal(conn, id))
    }

    /// Find an account by (normalized) email.
    pub fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM accounts WHERE email = ?1", ACCOUNT_COLUMNS);
            Ok(conn
                .query_row(&sql, params![email], parse_account_row)
                .optional()?)
        })
    }

    /// Find an account by its linked external identity.
    pub fn find_account_by_external_id(&self, external_id: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM accounts WHERE external_id = ?1",
                ACCOUNT_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![external_id], parse_account_row)
                .optional()?)
        })
    }

    /// Insert a new account. Uniqueness violations surface as `rusqlite` errors.
    pub fn insert_account(&self, new: &NewAccount) -> Result<Account> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (email, external_id, password_hash, display_name,
                    provider_access_token, provider_refresh_token, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    new.email,
                    new.external_id,
                    new.password_hash,
                    new.display_name,
                    new.access_token,
                    new.refresh_token,
                    now
                ],
            )?;
            let id = AccountId(conn.last_insert_rowid());
            get_account_internal(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Account {} vanished after insert", id))
        })
    }

    /// Apply a provider login to an account.
    ///
    /// The write only lands while the account is unlinked or already linked to
    /// `update.external_id`; otherwise nothing changes and `None` is returned.
    pub fn apply_account_update(
        &self,
        id: AccountId,
        update: &AccountUpdate,
    ) -> Result<Option<Account>> {
        let now = now_ms();
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE accounts SET
                    external_id = ?1,
                    display_name = ?2,
                    provider_access_token = ?3,
                    provider_refresh_token = COALESCE(?4, provider_refresh_token),
                    updated_at = ?5
                 WHERE id = ?6 AND (external_id IS NULL OR external_id = ?1)",
                params![
                    update.external_id,
                    update.display_name,
                    update.access_token,
                    update.refresh_token,
                    now,
                    id.0
                ],
            )?;
            if rows == 0 {
                return Ok(None);
            }
            get_account_internal(conn, id)
        })
    }

    /// Replace an account's password hash.
    pub fn set_password_hash(&self, id: AccountId, password_hash: &str) -> Result<bool> {
        let now = now_ms();
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE accounts SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
                params![password_hash, now, id.0],
            )?;
            Ok(rows > 0)
        })
    }
}

fn store_error(err: anyhow::Error) -> StoreError {
    match unique_violation(&err) {
        Some(field) => StoreError::UniqueViolation(field),
        None => StoreError::Other(err),
    }
}

impl AccountStore for Database {
    fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.find_account_by_email(email).map_err(store_error)
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Account>, StoreError> {
        self.find_account_by_external_id(external_id)
            .map_err(store_error)
    }

    fn insert(&self, account: &NewAccount) -> Result<Account, StoreError> {
        self.insert_account(account).map_err(store_error)
    }

    fn update(&self, id: AccountId, update: &AccountUpdate) -> Result<Option<Account>, StoreError> {
        self.apply_account_update(id, update).map_err(store_error)
    }
}
