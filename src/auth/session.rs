//! Cookie sessions and the per-request [`Caller`].

use super::password::random_token;
use crate::db::Database;
use crate::types::{Account, AccountId};
use crate::web::AppState;
use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Redirect;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "taskboard_session";

/// The signed-in account making a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub account: Account,
    pub session_token: String,
}

impl Caller {
    pub fn id(&self) -> AccountId {
        self.account.id
    }
}

/// Read a cookie value from request headers.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|part| part.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// `Set-Cookie` value for a new session.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    Ok(HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        SESSION_COOKIE, token, max_age_secs, secure
    ))?)
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    let value = if secure {
        "taskboard_session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; Secure"
    } else {
        "taskboard_session=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"
    };
    HeaderValue::from_static(value)
}

/// Create a session for an account and return its token.
pub fn start_session(db: &Database, account_id: AccountId, ttl_secs: i64) -> Result<String> {
    let token = random_token(32)?;
    db.create_session(&token, account_id, ttl_secs.saturating_mul(1000))?;
    tracing::debug!(account_id = %account_id, "Session started");
    Ok(token)
}

/// Resolve the caller from the session cookie, if any.
pub fn current_caller(db: &Database, headers: &HeaderMap) -> Result<Option<Caller>> {
    let Some(token) = parse_cookie(headers, SESSION_COOKIE) else {
        return Ok(None);
    };
    let Some(account_id) = db.session_account(&token)? else {
        return Ok(None);
    };
    Ok(db.get_account(account_id)?.map(|account| Caller {
        account,
        session_token: token,
    }))
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match current_caller(state.db(), &parts.headers) {
            Ok(Some(caller)) => Ok(caller),
            Ok(None) => Err(Redirect::to("/login")),
            Err(e) => {
                tracing::error!("Failed to load session: {}", e);
                Err(Redirect::to("/login"))
            }
        }
    }
}
