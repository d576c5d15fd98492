//! Task CRUD operations.
//!
//! Storage here is ownership-agnostic; callers go through the task service,
//! which checks the owner before any read or write of a single task.

use super::{Database, now_ms};
use crate::types::{AccountId, Task, TaskFilter, TaskInput, TaskPage, TaskStatus};
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a task from a database row.
pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let status = status.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
    })?;

    let due_date: Option<String> = row.get("due_date")?;
    let due_date = due_date
        .map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(Task {
        id: row.get("id")?,
        owner_id: AccountId(row.get("owner_id")?),
        title: row.get("title")?,
        description: row.get("description")?,
        task_type: row.get("type")?,
        status,
        due_date,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn get_task_internal(conn: &Connection, task_id: i64) -> Result<Option<Task>> {
    Ok(conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?)
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

/// Append owner and filter predicates to a `WHERE` clause.
fn push_filters(
    sql: &mut String,
    params_vec: &mut Vec<Box<dyn rusqlite::ToSql>>,
    owner_id: AccountId,
    filter: &TaskFilter,
) {
    sql.push_str(" WHERE owner_id = ?");
    params_vec.push(Box::new(owner_id.0));

    if let Some(ref t) = filter.task_type {
        sql.push_str(" AND type = ?");
        params_vec.push(Box::new(t.clone()));
    }

    if let Some(s) = filter.status {
        sql.push_str(" AND status = ?");
        params_vec.push(Box::new(s.as_str()));
    }
}

impl Database {
    /// Create a task owned by `owner_id`.
    pub fn create_task(&self, owner_id: AccountId, input: &TaskInput) -> Result<Task> {
        let now = now_ms();
        let status = input.status.unwrap_or_default();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (owner_id, title, description, type, status, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    owner_id.0,
                    input.title,
                    input.description,
                    input.task_type,
                    status.as_str(),
                    format_date(input.due_date),
                    now
                ],
            )?;
            let id = conn.last_insert_rowid();
            get_task_internal(conn, id)?.ok_or_else(|| anyhow!("Task {} vanished after insert", id))
        })
    }

    /// Get a task by id.
    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Overwrite a task's fields. A `None` status keeps the stored status.
    pub fn update_task(&self, task_id: i64, input: &TaskInput) -> Result<Option<Task>> {
        let now = now_ms();

        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE tasks SET
                    title = ?1,
                    description = ?2,
                    type = ?3,
                    status = COALESCE(?4, status),
                    due_date = ?5,
                    updated_at = ?6
                 WHERE id = ?7",
                params![
                    input.title,
                    input.description,
                    input.task_type,
                    input.status.map(|s| s.as_str()),
                    format_date(input.due_date),
                    now,
                    task_id
                ],
            )?;
            if rows == 0 {
                return Ok(None);
            }
            get_task_internal(conn, task_id)
        })
    }

    /// Delete a task. Returns false if it did not exist.
    pub fn delete_task(&self, task_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
            Ok(rows > 0)
        })
    }

    /// List one page of an owner's tasks, newest first.
    ///
    /// `page` is 1-based; pages past the end come back empty with the real total.
    pub fn list_tasks(
        &self,
        owner_id: AccountId,
        filter: &TaskFilter,
        page: i64,
        per_page: i64,
    ) -> Result<TaskPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        self.with_conn(|conn| {
            let mut where_sql = String::new();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            push_filters(&mut where_sql, &mut params_vec, owner_id, filter);

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tasks{}", where_sql),
                params_refs.as_slice(),
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT * FROM tasks{} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                where_sql,
                per_page,
                (page - 1).saturating_mul(per_page)
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(TaskPage {
                tasks,
                total,
                page,
                per_page,
                total_pages: total.saturating_add(per_page - 1) / per_page,
            })
        })
    }

    /// Distinct non-empty task types used by one owner, sorted.
    pub fn list_task_types(&self, owner_id: AccountId) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT type FROM tasks
                 WHERE owner_id = ?1 AND type IS NOT NULL AND type != ''
                 ORDER BY type",
            )?;
            let types = stmt
                .query_map(params![owner_id.0], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(types)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewAccount;

    fn setup() -> (Database, AccountId) {
        let db = Database::open_in_memory().unwrap();
        let account = db
            .insert_account(&NewAccount {
                email: "owner@example.com".into(),
                external_id: None,
                password_hash: "hash".into(),
                display_name: "Owner".into(),
                access_token: None,
                refresh_token: None,
            })
            .unwrap();
        (db, account.id)
    }

    fn input(title: &str) -> TaskInput {
        TaskInput {
            title: title.into(),
            description: None,
            task_type: None,
            status: None,
            due_date: None,
        }
    }

    #[test]
    fn test_create_defaults_to_open() {
        let (db, owner) = setup();
        let task = db.create_task(owner, &input("First")).unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.owner_id, owner);
    }

    #[test]
    fn test_due_date_survives_storage() {
        let (db, owner) = setup();
        let mut fields = input("Dated");
        fields.due_date = NaiveDate::from_ymd_opt(2025, 3, 14);
        let task = db.create_task(owner, &fields).unwrap();

        let fetched = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(fetched.due_date, NaiveDate::from_ymd_opt(2025, 3, 14));
    }

    #[test]
    fn test_update_without_status_keeps_status() {
        let (db, owner) = setup();
        let mut fields = input("Work");
        fields.status = Some(TaskStatus::InProgress);
        let task = db.create_task(owner, &fields).unwrap();

        let updated = db.update_task(task.id, &input("Renamed")).unwrap().unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_delete_missing_task() {
        let (db, _) = setup();
        assert!(!db.delete_task(999).unwrap());
    }
}
