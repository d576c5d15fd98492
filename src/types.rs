//! Core types for the task board.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Internal account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sign-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub external_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub provider_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub provider_refresh_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields for inserting a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub external_id: Option<String>,
    pub password_hash: String,
    pub display_name: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Mutable fields written on a provider login.
///
/// `external_id` is always written; the store only applies the update while the
/// row is unlinked or already linked to this same id.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub external_id: String,
    pub display_name: String,
    pub access_token: String,
    /// `None` keeps the stored refresh token.
    pub refresh_token: Option<String>,
}

/// A verified identity returned by an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Task status. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Closed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Open, TaskStatus::InProgress, TaskStatus::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Closed => "closed",
        }
    }

    /// Human label for display.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Open => "Open",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "closed" => Ok(TaskStatus::Closed),
            other => Err(format!(
                "status must be one of open, in_progress, closed (got '{}')",
                other
            )),
        }
    }
}

/// A task owned by one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub owner_id: AccountId,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Validated task fields for create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub title: String,
    pub description: Option<String>,
    pub task_type: Option<String>,
    /// `None` means the default on create and "unchanged" on update.
    pub status: Option<TaskStatus>,
    pub due_date: Option<NaiveDate>,
}

/// Filters for listing tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
}

/// One page of tasks.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Task counts per status, always containing all three statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub open: i64,
    pub in_progress: i64,
    pub closed: i64,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> i64 {
        match status {
            TaskStatus::Open => self.open,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Closed => self.closed,
        }
    }

    pub fn total(&self) -> i64 {
        self.open + self.in_progress + self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_known_values_only() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
        assert!("Open".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_counts_serialize_all_keys() {
        let json = serde_json::to_value(StatusCounts::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"open": 0, "in_progress": 0, "closed": 0})
        );
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn account_serialization_hides_secrets() {
        let account = Account {
            id: AccountId(1),
            email: "a@x.com".into(),
            external_id: None,
            password_hash: "$argon2id$secret".into(),
            display_name: "A".into(),
            provider_access_token: Some("tok".into()),
            provider_refresh_token: None,
            created_at: 0,
            updated_at: 0,
        };
        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("tok"));
    }
}
