//! Authentication: password accounts, provider logins and sessions.

pub mod linking;
pub mod password;
pub mod provider;
pub mod session;

pub use linking::{
    AccountStore, Decision, LinkOutcome, LinkingError, LinkingResolver, Resolution, StoreError,
    UniqueField, decide,
};
pub use provider::{GoogleProvider, IdentityProvider, ProviderError};
pub use session::{Caller, SESSION_COOKIE};

use crate::db::Database;
use crate::db::accounts::unique_violation;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::types::{Account, AccountId, NewAccount, normalize_email};
use tracing::{info, warn};

/// Registration form fields.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Registration {
    pub email: String,
    pub name: String,
    pub password: String,
    pub password_confirmation: String,
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    }
}

fn validate_password(password: &str, confirmation: &str, min_length: usize) -> AppResult<()> {
    if password.chars().count() < min_length {
        return Err(AppError::invalid_value(
            "password",
            format!("The password must be at least {} characters.", min_length),
        ));
    }
    if password != confirmation {
        return Err(AppError::invalid_value(
            "password",
            "The password confirmation does not match.",
        ));
    }
    Ok(())
}

/// Create a password account.
pub fn register(db: &Database, form: &Registration, min_password_length: usize) -> AppResult<Account> {
    let email = normalize_email(&form.email);
    if email.is_empty() {
        return Err(AppError::missing_field("email"));
    }
    if !looks_like_email(&email) {
        return Err(AppError::invalid_value(
            "email",
            "The email must be a valid email address.",
        ));
    }

    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::missing_field("name"));
    }
    if name.chars().count() > 255 {
        return Err(AppError::invalid_value(
            "name",
            "The name may not be greater than 255 characters.",
        ));
    }

    validate_password(&form.password, &form.password_confirmation, min_password_length)?;

    let password_hash = password::hash_password(&form.password)?;
    let new = NewAccount {
        email: email.clone(),
        external_id: None,
        password_hash,
        display_name: name.to_string(),
        access_token: None,
        refresh_token: None,
    };

    match db.insert_account(&new) {
        Ok(account) => {
            info!(email = %email, account_id = %account.id, "Registered account");
            Ok(account)
        }
        Err(e) if unique_violation(&e) == Some(UniqueField::Email) => Err(
            AppError::already_exists("email", "The email has already been taken."),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Check an email and password. Unknown email and wrong password are indistinguishable.
pub fn authenticate(db: &Database, email: &str, password: &str) -> AppResult<Account> {
    let email = normalize_email(email);
    match db.find_account_by_email(&email)? {
        Some(account) if password::verify_password(&account.password_hash, password) => {
            Ok(account)
        }
        _ => {
            warn!(email = %email, "Password login failed");
            Err(AppError::invalid_credentials())
        }
    }
}

/// Replace the password of a signed-in account.
pub fn set_password(
    db: &Database,
    account_id: AccountId,
    password: &str,
    confirmation: &str,
    min_password_length: usize,
) -> AppResult<()> {
    validate_password(password, confirmation, min_password_length)?;
    let hash = password::hash_password(password)?;
    if !db.set_password_hash(account_id, &hash)? {
        return Err(AppError::unauthenticated());
    }
    info!(account_id = %account_id, "Password updated");
    Ok(())
}

/// Complete a provider login: check the state, fetch the identity, link the account.
pub async fn login_with_provider(
    db: &Database,
    provider: &dyn IdentityProvider,
    code: &str,
    state: &str,
    state_ttl_ms: i64,
) -> Result<Resolution, LinkingError> {
    let state_ok = !state.is_empty()
        && db
            .consume_oauth_state(state, state_ttl_ms)
            .map_err(LinkingError::Storage)?;
    if code.is_empty() || !state_ok {
        warn!(provider = provider.name(), "OAuth callback with missing or unknown state");
        return Err(ProviderError::InvalidSession.into());
    }

    let identity = match provider.verified_identity(code).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return Err(ProviderError::Malformed("no verified identity returned".into()).into());
        }
        Err(e) => {
            warn!(provider = provider.name(), error = %e, "Identity provider request failed");
            return Err(e.into());
        }
    };

    let resolution = LinkingResolver::new(db).resolve(&identity).inspect_err(|e| {
        warn!(
            provider = provider.name(),
            email = %identity.email,
            attempted_external_id = %identity.external_id,
            error = %e,
            "Provider login failed"
        );
    })?;

    info!(
        provider = provider.name(),
        account_id = %resolution.account.id,
        outcome = ?resolution.outcome,
        "Provider login succeeded"
    );
    Ok(resolution)
}

impl From<LinkingError> for AppError {
    fn from(err: LinkingError) -> Self {
        let details = err.to_string();
        let app = match &err {
            LinkingError::ProviderUnavailable(ProviderError::InvalidSession) => AppError::new(
                ErrorCode::ProviderUnavailable,
                "Login session expired or was invalid. Please try again.",
            ),
            LinkingError::ProviderUnavailable(ProviderError::Malformed(_)) => AppError::new(
                ErrorCode::ProviderUnavailable,
                "Could not retrieve user information from Google.",
            ),
            LinkingError::ProviderUnavailable(_) => AppError::new(
                ErrorCode::ProviderUnavailable,
                "Could not connect to Google. Please try again later.",
            ),
            LinkingError::IdentityConflict { .. } => AppError::new(
                ErrorCode::IdentityConflict,
                "This email address is already associated with a different Google account. \
                 Please log in with the correct Google account or use your password if you have one.",
            ),
            LinkingError::StorageConflict { .. } => AppError::new(
                ErrorCode::StorageConflict,
                "An account with this email already exists. Please try logging in with a different method.",
            ),
            LinkingError::Storage(_) => AppError::new(
                ErrorCode::DatabaseError,
                "A database error occurred during login. Please try again.",
            ),
            LinkingError::Internal(_) => AppError::new(
                ErrorCode::InternalError,
                "An unexpected error occurred during login. Please try again.",
            ),
        };
        app.with_details(details)
    }
}
