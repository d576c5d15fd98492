//! Integration tests for account linking on external-identity login.

use std::cell::Cell;
use taskboard::auth::{
    AccountStore, LinkOutcome, LinkingError, LinkingResolver, ProviderError, StoreError,
    UniqueField,
};
use taskboard::db::Database;
use taskboard::types::{Account, AccountId, AccountUpdate, ExternalIdentity, NewAccount};

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn identity(external_id: &str, email: &str, name: &str) -> ExternalIdentity {
    ExternalIdentity {
        external_id: external_id.to_string(),
        email: email.to_string(),
        display_name: name.to_string(),
        access_token: format!("access-{}", external_id),
        refresh_token: None,
    }
}

fn password_account(db: &Database, email: &str) -> Account {
    db.insert_account(&NewAccount {
        email: email.to_string(),
        external_id: None,
        password_hash: "hash".to_string(),
        display_name: "Password User".to_string(),
        access_token: None,
        refresh_token: None,
    })
    .unwrap()
}

mod decision_tests {
    use super::*;

    #[test]
    fn test_unknown_email_creates_linked_account() {
        let db = setup_db();
        let resolver = LinkingResolver::new(&db);

        let resolution = resolver.resolve(&identity("g9", "b@x.com", "B")).unwrap();
        assert_eq!(resolution.outcome, LinkOutcome::Created);
        assert_eq!(resolution.account.email, "b@x.com");
        assert_eq!(resolution.account.external_id.as_deref(), Some("g9"));
        assert_eq!(resolution.account.display_name, "B");
        assert!(resolution.account.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn test_second_login_refreshes_same_account() {
        let db = setup_db();
        let resolver = LinkingResolver::new(&db);

        let first = resolver.resolve(&identity("g9", "b@x.com", "B")).unwrap();
        let second = resolver
            .resolve(&identity("g9", "b@x.com", "B. Renamed"))
            .unwrap();

        assert_eq!(second.outcome, LinkOutcome::Refreshed);
        assert_eq!(second.account.id, first.account.id);
        assert_eq!(second.account.display_name, "B. Renamed");
    }

    #[test]
    fn test_unlinked_account_is_linked_then_refreshed() {
        let db = setup_db();
        let existing = password_account(&db, "a@x.com");
        let resolver = LinkingResolver::new(&db);

        let linked = resolver.resolve(&identity("g1", "a@x.com", "A")).unwrap();
        assert_eq!(linked.outcome, LinkOutcome::Linked);
        assert_eq!(linked.account.id, existing.id);
        assert_eq!(linked.account.external_id.as_deref(), Some("g1"));
        assert_eq!(linked.account.password_hash, "hash");

        let again = resolver.resolve(&identity("g1", "a@x.com", "A")).unwrap();
        assert_eq!(again.outcome, LinkOutcome::Refreshed);
        assert_eq!(again.account.id, existing.id);
    }

    #[test]
    fn test_mismatched_identity_conflicts_without_mutation() {
        let db = setup_db();
        let existing = password_account(&db, "a@x.com");
        let resolver = LinkingResolver::new(&db);
        resolver.resolve(&identity("g1", "a@x.com", "A")).unwrap();
        let before = db.get_account(existing.id).unwrap().unwrap();

        let err = resolver
            .resolve(&identity("g2", "a@x.com", "Impostor"))
            .unwrap_err();
        match err {
            LinkingError::IdentityConflict {
                email,
                account_id,
                existing_external_id,
                attempted_external_id,
            } => {
                assert_eq!(email, "a@x.com");
                assert_eq!(account_id, existing.id);
                assert_eq!(existing_external_id, "g1");
                assert_eq!(attempted_external_id, "g2");
            }
            other => panic!("expected IdentityConflict, got {:?}", other),
        }

        let after = db.get_account(existing.id).unwrap().unwrap();
        assert_eq!(after.external_id.as_deref(), Some("g1"));
        assert_eq!(after.display_name, before.display_name);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_email_matching_ignores_case() {
        let db = setup_db();
        let existing = password_account(&db, "a@x.com");

        let resolution = LinkingResolver::new(&db)
            .resolve(&identity("g1", "A@X.COM", "A"))
            .unwrap();
        assert_eq!(resolution.account.id, existing.id);
        assert_eq!(resolution.outcome, LinkOutcome::Linked);
    }

    #[test]
    fn test_distinct_emails_get_distinct_accounts() {
        let db = setup_db();
        let resolver = LinkingResolver::new(&db);

        let a = resolver.resolve(&identity("g1", "a@x.com", "A")).unwrap();
        let b = resolver.resolve(&identity("g2", "b@x.com", "B")).unwrap();
        assert_ne!(a.account.id, b.account.id);
        assert_ne!(a.account.email, b.account.email);
        assert_ne!(a.account.external_id, b.account.external_id);
    }

    #[test]
    fn test_refresh_token_kept_when_provider_omits_it() {
        let db = setup_db();
        let resolver = LinkingResolver::new(&db);

        let mut first = identity("g1", "a@x.com", "A");
        first.refresh_token = Some("refresh-1".into());
        let created = resolver.resolve(&first).unwrap();

        resolver.resolve(&identity("g1", "a@x.com", "A")).unwrap();
        let stored = db.get_account(created.account.id).unwrap().unwrap();
        assert_eq!(stored.provider_refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(stored.provider_access_token.as_deref(), Some("access-g1"));
    }

    #[test]
    fn test_identity_without_email_is_rejected() {
        let db = setup_db();
        let err = LinkingResolver::new(&db)
            .resolve(&identity("g1", "  ", "A"))
            .unwrap_err();
        assert!(matches!(
            err,
            LinkingError::ProviderUnavailable(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_identity_without_external_id_is_rejected() {
        let db = setup_db();
        let err = LinkingResolver::new(&db)
            .resolve(&identity("", "a@x.com", "A"))
            .unwrap_err();
        assert!(matches!(err, LinkingError::ProviderUnavailable(_)));
        assert!(db.find_account_by_email("a@x.com").unwrap().is_none());
    }
}

mod race_tests {
    use super::*;

    /// Inserts a competing account for the same email just before the first insert.
    struct ConcurrentCreateStore<'a> {
        db: &'a Database,
        competitor_external_id: Option<&'static str>,
        inserts: Cell<u32>,
    }

    impl AccountStore for ConcurrentCreateStore<'_> {
        fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            self.db.find_by_email(email)
        }

        fn find_by_external_id(&self, external_id: &str) -> Result<Option<Account>, StoreError> {
            self.db.find_by_external_id(external_id)
        }

        fn insert(&self, account: &NewAccount) -> Result<Account, StoreError> {
            self.inserts.set(self.inserts.get() + 1);
            if self.inserts.get() == 1 {
                let mut competitor = account.clone();
                competitor.external_id = self.competitor_external_id.map(str::to_string);
                competitor.display_name = "Competitor".into();
                self.db.insert(&competitor)?;
            }
            self.db.insert(account)
        }

        fn update(
            &self,
            id: AccountId,
            update: &AccountUpdate,
        ) -> Result<Option<Account>, StoreError> {
            self.db.update(id, update)
        }
    }

    #[test]
    fn test_concurrent_create_of_unlinked_account_retries_into_link() {
        let db = setup_db();
        let store = ConcurrentCreateStore {
            db: &db,
            competitor_external_id: None,
            inserts: Cell::new(0),
        };

        let resolution = LinkingResolver::new(&store)
            .resolve(&identity("g1", "a@x.com", "A"))
            .unwrap();
        assert_eq!(store.inserts.get(), 1);
        assert_eq!(resolution.outcome, LinkOutcome::Linked);

        let only = db.find_account_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(only.id, resolution.account.id);
        assert_eq!(only.external_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_concurrent_create_by_same_identity_retries_into_refresh() {
        let db = setup_db();
        let store = ConcurrentCreateStore {
            db: &db,
            competitor_external_id: Some("g1"),
            inserts: Cell::new(0),
        };

        // The competitor holds the same email and external id; either index may
        // report the collision, and both must retry into a refresh.
        let resolution = LinkingResolver::new(&store)
            .resolve(&identity("g1", "a@x.com", "A"))
            .unwrap();
        assert_eq!(resolution.outcome, LinkOutcome::Refreshed);
        assert_eq!(resolution.account.display_name, "A");

        let only = db.find_account_by_external_id("g1").unwrap().unwrap();
        assert_eq!(only.id, resolution.account.id);
        assert_eq!(store.inserts.get(), 1);
    }

    /// Every insert reports an email collision, yet no account is ever visible.
    struct PhantomEmailStore {
        inserts: Cell<u32>,
        lookups: Cell<u32>,
    }

    impl AccountStore for PhantomEmailStore {
        fn find_by_email(&self, _email: &str) -> Result<Option<Account>, StoreError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(None)
        }

        fn find_by_external_id(&self, _external_id: &str) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }

        fn insert(&self, _account: &NewAccount) -> Result<Account, StoreError> {
            self.inserts.set(self.inserts.get() + 1);
            Err(StoreError::UniqueViolation(UniqueField::Email))
        }

        fn update(
            &self,
            _id: AccountId,
            _update: &AccountUpdate,
        ) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
    }

    #[test]
    fn test_second_email_violation_is_storage_conflict() {
        let store = PhantomEmailStore {
            inserts: Cell::new(0),
            lookups: Cell::new(0),
        };

        let err = LinkingResolver::new(&store)
            .resolve(&identity("g1", "a@x.com", "A"))
            .unwrap_err();
        assert!(matches!(err, LinkingError::StorageConflict { .. }));
        assert_eq!(store.inserts.get(), 2);
        assert_eq!(store.lookups.get(), 2);
    }

    #[test]
    fn test_external_id_violation_is_immediate_storage_conflict() {
        let db = setup_db();
        let resolver = LinkingResolver::new(&db);
        let holder = resolver
            .resolve(&identity("g1", "old@x.com", "Old"))
            .unwrap();

        let err = resolver
            .resolve(&identity("g1", "new@x.com", "New"))
            .unwrap_err();
        assert!(matches!(err, LinkingError::StorageConflict { .. }));
        assert!(db.find_account_by_email("new@x.com").unwrap().is_none());

        let unchanged = db.get_account(holder.account.id).unwrap().unwrap();
        assert_eq!(unchanged.email, "old@x.com");
    }

    /// Links the account to another identity right before the resolver's update.
    struct ConcurrentLinkStore<'a> {
        db: &'a Database,
        updates: Cell<u32>,
    }

    impl AccountStore for ConcurrentLinkStore<'_> {
        fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            self.db.find_by_email(email)
        }

        fn find_by_external_id(&self, external_id: &str) -> Result<Option<Account>, StoreError> {
            self.db.find_by_external_id(external_id)
        }

        fn insert(&self, account: &NewAccount) -> Result<Account, StoreError> {
            self.db.insert(account)
        }

        fn update(
            &self,
            id: AccountId,
            update: &AccountUpdate,
        ) -> Result<Option<Account>, StoreError> {
            self.updates.set(self.updates.get() + 1);
            if self.updates.get() == 1 {
                let rival = AccountUpdate {
                    external_id: "g-rival".into(),
                    display_name: "Rival".into(),
                    access_token: "rival-token".into(),
                    refresh_token: None,
                };
                self.db.update(id, &rival)?;
            }
            self.db.update(id, update)
        }
    }

    #[test]
    fn test_lost_link_race_rereads_into_conflict() {
        let db = setup_db();
        let existing = password_account(&db, "a@x.com");
        let store = ConcurrentLinkStore {
            db: &db,
            updates: Cell::new(0),
        };

        let err = LinkingResolver::new(&store)
            .resolve(&identity("g1", "a@x.com", "A"))
            .unwrap_err();
        assert!(matches!(err, LinkingError::IdentityConflict { .. }));
        assert_eq!(store.updates.get(), 1);

        let stored = db.get_account(existing.id).unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("g-rival"));
    }

    /// Lookups fail outright.
    struct BrokenStore {
        lookups: Cell<u32>,
    }

    impl AccountStore for BrokenStore {
        fn find_by_email(&self, _email: &str) -> Result<Option<Account>, StoreError> {
            self.lookups.set(self.lookups.get() + 1);
            Err(StoreError::Other(anyhow::anyhow!("disk I/O error")))
        }

        fn find_by_external_id(&self, _external_id: &str) -> Result<Option<Account>, StoreError> {
            Err(StoreError::Other(anyhow::anyhow!("disk I/O error")))
        }

        fn insert(&self, _account: &NewAccount) -> Result<Account, StoreError> {
            Err(StoreError::Other(anyhow::anyhow!("disk I/O error")))
        }

        fn update(
            &self,
            _id: AccountId,
            _update: &AccountUpdate,
        ) -> Result<Option<Account>, StoreError> {
            Err(StoreError::Other(anyhow::anyhow!("disk I/O error")))
        }
    }

    #[test]
    fn test_storage_errors_propagate_without_retry() {
        let store = BrokenStore {
            lookups: Cell::new(0),
        };
        let err = LinkingResolver::new(&store)
            .resolve(&identity("g1", "a@x.com", "A"))
            .unwrap_err();
        assert!(matches!(err, LinkingError::Storage(_)));
        assert_eq!(store.lookups.get(), 1);
    }
}
