//! Account linking for external-identity logins.
//!
//! A verified identity is matched to an account by email. The outcome is one of
//! four cases, computed by [`decide`] and then applied against an [`AccountStore`]:
//!
//! | stored account for the email   | decision   |
//! |--------------------------------|------------|
//! | none                           | `Create`   |
//! | present, no external id        | `Link`     |
//! | present, same external id      | `Refresh`  |
//! | present, different external id | `Conflict` |
//!
//! An account's external id is never cleared or repointed here. Races with a
//! concurrent login for the same email surface as a uniqueness violation or a
//! rejected guarded update; the resolver re-reads once and then gives up.

use super::password::{hash_password, random_secret};
use super::provider::ProviderError;
use crate::types::{Account, AccountId, AccountUpdate, ExternalIdentity, NewAccount, normalize_email};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Account column protected by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    ExternalId,
}

/// Errors surfaced by an [`AccountStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0:?}")]
    UniqueViolation(UniqueField),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistent account storage used by the resolver.
pub trait AccountStore {
    fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Account>, StoreError>;

    /// Insert a new account. Duplicate email or external id is a `UniqueViolation`.
    fn insert(&self, account: &NewAccount) -> Result<Account, StoreError>;

    /// Write login fields to an account.
    ///
    /// Must only apply while the stored external id is null or equal to
    /// `update.external_id`; returns `Ok(None)` when that guard rejects the write.
    fn update(&self, id: AccountId, update: &AccountUpdate) -> Result<Option<Account>, StoreError>;
}

/// What to do with a verified identity, given the account stored for its email.
#[derive(Debug, Clone)]
pub enum Decision {
    Create,
    Link(Account),
    Refresh(Account),
    Conflict(Account),
}

/// How a login was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Linked,
    Refreshed,
}

/// The account to sign in as.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub account: Account,
    pub outcome: LinkOutcome,
}

#[derive(Debug, Error)]
pub enum LinkingError {
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    #[error(
        "email {email} is linked to a different external identity (account {account_id})"
    )]
    IdentityConflict {
        email: String,
        account_id: AccountId,
        existing_external_id: String,
        attempted_external_id: String,
    },

    #[error("account storage changed concurrently for {email}: {detail}")]
    StorageConflict { email: String, detail: String },

    #[error(transparent)]
    Storage(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

/// Decide how to handle `identity` given the account currently stored for its email.
pub fn decide(existing: Option<&Account>, identity: &ExternalIdentity) -> Decision {
    match existing {
        None => Decision::Create,
        Some(account) => match account.external_id.as_deref() {
            None => Decision::Link(account.clone()),
            Some(id) if id == identity.external_id => Decision::Refresh(account.clone()),
            Some(_) => Decision::Conflict(account.clone()),
        },
    }
}

/// Result of one attempt: done, or the store moved underneath us.
enum Attempt {
    Done(Resolution),
    Raced(&'static str),
}

/// Resolves verified identities to accounts.
pub struct LinkingResolver<'a, S: AccountStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AccountStore + ?Sized> LinkingResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolve `identity` to the account to sign in as.
    pub fn resolve(&self, identity: &ExternalIdentity) -> Result<Resolution, LinkingError> {
        if identity.external_id.trim().is_empty() {
            return Err(ProviderError::Malformed("identity has no external id".into()).into());
        }
        let email = normalize_email(&identity.email);
        if email.is_empty() {
            return Err(ProviderError::Malformed("identity has no email".into()).into());
        }

        match self.attempt(&email, identity)? {
            Attempt::Done(resolution) => Ok(resolution),
            Attempt::Raced(reason) => {
                debug!(email = %email, reason, "Account changed during login, retrying");
                match self.attempt(&email, identity)? {
                    Attempt::Done(resolution) => Ok(resolution),
                    Attempt::Raced(reason) => {
                        warn!(
                            email = %email,
                            external_id = %identity.external_id,
                            reason,
                            "Account changed again during login retry"
                        );
                        Err(LinkingError::StorageConflict {
                            email,
                            detail: reason.to_string(),
                        })
                    }
                }
            }
        }
    }

    fn attempt(&self, email: &str, identity: &ExternalIdentity) -> Result<Attempt, LinkingError> {
        let existing = self.store.find_by_email(email).map_err(storage)?;

        match decide(existing.as_ref(), identity) {
            Decision::Create => self.create(email, identity),
            Decision::Link(account) => self.write(account, identity, LinkOutcome::Linked),
            Decision::Refresh(account) => self.write(account, identity, LinkOutcome::Refreshed),
            Decision::Conflict(account) => {
                let existing_external_id = account.external_id.unwrap_or_default();
                warn!(
                    email = %email,
                    account_id = %account.id,
                    existing_external_id = %existing_external_id,
                    attempted_external_id = %identity.external_id,
                    "Login email is linked to a different external identity"
                );
                Err(LinkingError::IdentityConflict {
                    email: email.to_string(),
                    account_id: account.id,
                    existing_external_id,
                    attempted_external_id: identity.external_id.clone(),
                })
            }
        }
    }

    fn create(&self, email: &str, identity: &ExternalIdentity) -> Result<Attempt, LinkingError> {
        let secret = random_secret().map_err(LinkingError::Internal)?;
        let password_hash = hash_password(&secret).map_err(LinkingError::Internal)?;

        let new = NewAccount {
            email: email.to_string(),
            external_id: Some(identity.external_id.clone()),
            password_hash,
            display_name: identity.display_name.clone(),
            access_token: Some(identity.access_token.clone()),
            refresh_token: identity.refresh_token.clone(),
        };

        match self.store.insert(&new) {
            Ok(account) => {
                info!(email = %email, account_id = %account.id, "Created account from external login");
                Ok(Attempt::Done(Resolution {
                    account,
                    outcome: LinkOutcome::Created,
                }))
            }
            Err(StoreError::UniqueViolation(UniqueField::Email)) => {
                Ok(Attempt::Raced("email inserted concurrently"))
            }
            Err(StoreError::UniqueViolation(UniqueField::ExternalId)) => {
                // An identical login may have inserted the same row first; SQLite
                // then reports the external id index rather than the email one.
                if self.store.find_by_email(email).map_err(storage)?.is_some() {
                    return Ok(Attempt::Raced("account inserted concurrently"));
                }
                let holder = self
                    .store
                    .find_by_external_id(&identity.external_id)
                    .map_err(storage)?;
                warn!(
                    email = %email,
                    attempted_external_id = %identity.external_id,
                    holder_account_id = ?holder.as_ref().map(|a| a.id),
                    holder_email = ?holder.as_ref().map(|a| a.email.as_str()),
                    "External identity already belongs to another account"
                );
                Err(LinkingError::StorageConflict {
                    email: email.to_string(),
                    detail: "external identity already linked to another account".into(),
                })
            }
            Err(StoreError::Other(e)) => Err(LinkingError::Storage(e)),
        }
    }

    fn write(
        &self,
        account: Account,
        identity: &ExternalIdentity,
        outcome: LinkOutcome,
    ) -> Result<Attempt, LinkingError> {
        let update = AccountUpdate {
            external_id: identity.external_id.clone(),
            display_name: identity.display_name.clone(),
            access_token: identity.access_token.clone(),
            refresh_token: identity.refresh_token.clone(),
        };

        match self.store.update(account.id, &update) {
            Ok(Some(account)) => {
                if outcome == LinkOutcome::Linked {
                    info!(
                        email = %account.email,
                        account_id = %account.id,
                        external_id = %identity.external_id,
                        "Linked external identity to existing account"
                    );
                }
                Ok(Attempt::Done(Resolution { account, outcome }))
            }
            Ok(None) => Ok(Attempt::Raced("account linked concurrently")),
            Err(StoreError::UniqueViolation(UniqueField::ExternalId)) => {
                warn!(
                    email = %account.email,
                    attempted_external_id = %identity.external_id,
                    "External identity already belongs to another account"
                );
                Err(LinkingError::StorageConflict {
                    email: account.email,
                    detail: "external identity already linked to another account".into(),
                })
            }
            Err(StoreError::UniqueViolation(UniqueField::Email)) => {
                Ok(Attempt::Raced("email changed concurrently"))
            }
            Err(StoreError::Other(e)) => Err(LinkingError::Storage(e)),
        }
    }
}

fn storage(err: StoreError) -> LinkingError {
    match err {
        StoreError::Other(e) => LinkingError::Storage(e),
        StoreError::UniqueViolation(field) => {
            LinkingError::Storage(anyhow::anyhow!("unexpected unique violation on {:?}", field))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(external_id: Option<&str>) -> Account {
        Account {
            id: AccountId(1),
            email: "a@x.com".into(),
            external_id: external_id.map(str::to_string),
            password_hash: "hash".into(),
            display_name: "A".into(),
            provider_access_token: None,
            provider_refresh_token: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn identity(external_id: &str) -> ExternalIdentity {
        ExternalIdentity {
            external_id: external_id.into(),
            email: "a@x.com".into(),
            display_name: "A".into(),
            access_token: "tok".into(),
            refresh_token: None,
        }
    }

    #[test]
    fn test_decide_create_when_no_account() {
        assert!(matches!(decide(None, &identity("g1")), Decision::Create));
    }

    #[test]
    fn test_decide_link_unlinked_account() {
        let existing = account(None);
        assert!(matches!(
            decide(Some(&existing), &identity("g1")),
            Decision::Link(_)
        ));
    }

    #[test]
    fn test_decide_refresh_same_identity() {
        let existing = account(Some("g1"));
        assert!(matches!(
            decide(Some(&existing), &identity("g1")),
            Decision::Refresh(_)
        ));
    }

    #[test]
    fn test_decide_conflict_other_identity() {
        let existing = account(Some("g1"));
        assert!(matches!(
            decide(Some(&existing), &identity("g2")),
            Decision::Conflict(_)
        ));
    }
}
