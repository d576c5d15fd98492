//! Ownership-scoped task operations.
//!
//! Every call takes the [`Caller`] explicitly. Operations on a single existing task
//! go through [`authorize`], which is the only ownership check.

use crate::auth::Caller;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::types::{StatusCounts, Task, TaskFilter, TaskInput, TaskPage, TaskStatus};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{info, warn};

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_TYPE_LEN: usize = 50;

/// Raw task fields as submitted by a form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskForm {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// Trim a field and treat empty as absent.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a due date given as `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_due_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| AppError::invalid_value("due_date", "The due date is not a valid date."))
}

/// Validate raw form fields into a [`TaskInput`].
pub fn validate(form: &TaskForm) -> AppResult<TaskInput> {
    let title = non_empty(form.title.as_deref()).ok_or_else(|| AppError::missing_field("title"))?;
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::invalid_value(
            "title",
            format!("The title may not be greater than {} characters.", MAX_TITLE_LEN),
        ));
    }

    let task_type = non_empty(form.task_type.as_deref());
    if let Some(t) = task_type
        && t.chars().count() > MAX_TYPE_LEN
    {
        return Err(AppError::invalid_value(
            "type",
            format!("The type may not be greater than {} characters.", MAX_TYPE_LEN),
        ));
    }

    let status = non_empty(form.status.as_deref())
        .map(|s| s.parse::<TaskStatus>())
        .transpose()
        .map_err(|e| AppError::invalid_value("status", e))?;

    let due_date = non_empty(form.due_date.as_deref())
        .map(parse_due_date)
        .transpose()?;

    Ok(TaskInput {
        title: title.to_string(),
        description: non_empty(form.description.as_deref()).map(str::to_string),
        task_type: task_type.map(str::to_string),
        status,
        due_date,
    })
}

/// Check that `caller` owns `task`.
pub fn authorize(caller: &Caller, task: &Task, action: &str) -> AppResult<()> {
    if task.owner_id != caller.id() {
        warn!(
            account_id = %caller.id(),
            task_id = task.id,
            owner_id = %task.owner_id,
            action,
            "Refused access to task owned by another account"
        );
        return Err(AppError::forbidden(action, task.id));
    }
    Ok(())
}

/// Task operations for one database.
#[derive(Clone, Copy)]
pub struct TaskService<'a> {
    db: &'a Database,
    page_size: i64,
}

impl<'a> TaskService<'a> {
    pub fn new(db: &'a Database, page_size: i64) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    fn load_owned(&self, caller: &Caller, task_id: i64, action: &str) -> AppResult<Task> {
        let task = self
            .db
            .get_task(task_id)?
            .ok_or_else(|| AppError::task_not_found(task_id))?;
        authorize(caller, &task, action)?;
        Ok(task)
    }

    /// One page of the caller's tasks, newest first.
    pub fn list(&self, caller: &Caller, filter: &TaskFilter, page: i64) -> AppResult<TaskPage> {
        Ok(self.db.list_tasks(caller.id(), filter, page, self.page_size)?)
    }

    /// Distinct types in use among the caller's tasks.
    pub fn task_types(&self, caller: &Caller) -> AppResult<Vec<String>> {
        Ok(self.db.list_task_types(caller.id())?)
    }

    pub fn create(&self, caller: &Caller, form: &TaskForm) -> AppResult<Task> {
        let input = validate(form)?;
        let task = self.db.create_task(caller.id(), &input)?;
        info!(account_id = %caller.id(), task_id = task.id, "Task created");
        Ok(task)
    }

    /// Fetch a task the caller may edit.
    pub fn get_for_edit(&self, caller: &Caller, task_id: i64) -> AppResult<Task> {
        self.load_owned(caller, task_id, "edit")
    }

    pub fn update(&self, caller: &Caller, task_id: i64, form: &TaskForm) -> AppResult<Task> {
        self.load_owned(caller, task_id, "update")?;
        let input = validate(form)?;
        let task = self
            .db
            .update_task(task_id, &input)?
            .ok_or_else(|| AppError::task_not_found(task_id))?;
        info!(account_id = %caller.id(), task_id, "Task updated");
        Ok(task)
    }

    pub fn delete(&self, caller: &Caller, task_id: i64) -> AppResult<()> {
        self.load_owned(caller, task_id, "delete")?;
        if !self.db.delete_task(task_id)? {
            return Err(AppError::task_not_found(task_id));
        }
        info!(account_id = %caller.id(), task_id, "Task deleted");
        Ok(())
    }

    /// Per-status counts of the caller's tasks.
    pub fn stats_by_status(&self, caller: &Caller) -> AppResult<StatusCounts> {
        Ok(self.db.stats_by_status(caller.id())?)
    }
}
