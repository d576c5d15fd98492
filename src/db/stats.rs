//! Aggregation queries for statistics.

use super::Database;
use crate::types::{AccountId, StatusCounts, TaskStatus};
use anyhow::Result;
use rusqlite::params;

impl Database {
    /// Count an owner's tasks per status. Statuses with no tasks report zero.
    pub fn stats_by_status(&self, owner_id: AccountId) -> Result<StatusCounts> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM tasks WHERE owner_id = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![owner_id.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = StatusCounts::default();
            for row in rows {
                let (status, count) = row?;
                match status.parse::<TaskStatus>() {
                    Ok(TaskStatus::Open) => counts.open = count,
                    Ok(TaskStatus::InProgress) => counts.in_progress = count,
                    Ok(TaskStatus::Closed) => counts.closed = count,
                    Err(e) => tracing::warn!("Skipping unknown task status in stats: {}", e),
                }
            }

            Ok(counts)
        })
    }
}
