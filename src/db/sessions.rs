//! Login sessions and pending OAuth states.

use super::{Database, now_ms};
use crate::types::AccountId;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

impl Database {
    /// Store a new session token for an account, purging expired sessions.
    pub fn create_session(&self, token: &str, account_id: AccountId, ttl_ms: i64) -> Result<()> {
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
            tx.execute(
                "INSERT INTO sessions (id, account_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token, account_id.0, now, now + ttl_ms],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Resolve a session token to its account id, if the session is still live.
    pub fn session_account(&self, token: &str) -> Result<Option<AccountId>> {
        let now = now_ms();

        self.with_conn(|conn| {
            let id: Option<i64> = conn
                .query_row(
                    "SELECT account_id FROM sessions WHERE id = ?1 AND expires_at > ?2",
                    params![token, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.map(AccountId))
        })
    }

    /// Delete a session. Unknown tokens are ignored.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![token])?;
            Ok(())
        })
    }

    /// Record an OAuth state value issued with an authorization redirect.
    pub fn insert_oauth_state(&self, state: &str) -> Result<()> {
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO oauth_states (state, created_at) VALUES (?1, ?2)",
                params![state, now],
            )?;
            Ok(())
        })
    }

    /// Consume an OAuth state. Returns true only for a known state younger than `ttl_ms`.
    ///
    /// A state is single-use: it is removed whether or not it was still fresh.
    pub fn consume_oauth_state(&self, state: &str, ttl_ms: i64) -> Result<bool> {
        let now = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at: Option<i64> = tx
                .query_row(
                    "SELECT created_at FROM oauth_states WHERE state = ?1",
                    params![state],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "DELETE FROM oauth_states WHERE state = ?1 OR created_at <= ?2",
                params![state, now.saturating_sub(ttl_ms)],
            )?;
            tx.commit()?;

            Ok(created_at.is_some_and(|created| now - created < ttl_ms))
        })
    }
}
