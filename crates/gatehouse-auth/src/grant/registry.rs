//! Concurrency-safe grant registry.
//!
//! The registry owns the authoritative in-memory state for every live
//! grant and keeps secondary indexes (code value, access token value,
//! refresh token hash, CIBA auth_req_id) in lockstep with it under a
//! single mutex. All multi-key updates happen inside one critical
//! section, so no interleaving can observe a token indexed under a
//! removed grant or a half-rotated refresh pair.
//!
//! The entry store is write-through durability, not a source of truth:
//! mutations update memory first, then merge the snapshot into the store
//! outside the lock. A failed merge is logged with the grant id and the
//! in-memory result stands.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gatehouse_storage::{DynEntryStore, Entry, EntryKey, EntryKind, attr};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::grant::model::Grant;
use crate::grant::token::{AccessToken, IdToken, RefreshToken};

/// Outcome of an authorization code consumption attempt.
#[derive(Debug)]
pub enum CodeConsumption {
    /// The code was valid and is now consumed; the snapshot carries the
    /// consumed code.
    Consumed(Grant),
    /// The code had already been consumed. Every token issued under the
    /// grant has been revoked; the snapshot reflects the revocations.
    Replayed(Grant),
    /// The code exists but has passed its expiration time.
    Expired,
    /// No live grant holds this code.
    NotFound,
}

/// Outcome of inserting a token into a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInsert {
    /// The token was recorded and indexed.
    Inserted,
    /// Another live token already carries this value; nothing was
    /// recorded. The caller regenerates and retries.
    Collision,
    /// The grant does not exist.
    GrantNotFound,
}

#[derive(Default)]
struct RegistryIndex {
    grants: HashMap<Uuid, Grant>,
    by_code: HashMap<String, Uuid>,
    by_access_token: HashMap<String, Uuid>,
    by_refresh_hash: HashMap<String, Uuid>,
    by_auth_req_id: HashMap<String, Uuid>,
}

/// Registry of live authorization grants.
pub struct GrantRegistry {
    store: DynEntryStore,
    inner: Mutex<RegistryIndex>,
}

impl GrantRegistry {
    /// Creates an empty registry backed by the given entry store.
    #[must_use]
    pub fn new(store: DynEntryStore) -> Self {
        Self {
            store,
            inner: Mutex::new(RegistryIndex::default()),
        }
    }

    fn index(&self) -> MutexGuard<'_, RegistryIndex> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_for(grant: &Grant) -> Result<Entry, AuthError> {
        let payload = serde_json::to_value(grant)
            .map_err(|e| AuthError::internal(format!("grant serialization failed: {e}")))?;
        Ok(
            Entry::new(EntryKey::new(grant.grant_id.to_string(), EntryKind::Grant))
                .with_attr(attr::GRANT_ID, grant.grant_id.to_string())
                .with_attr(attr::CLIENT_ID, grant.client_id.clone())
                .with_attr(attr::EXPIRES_AT, grant.latest_expiry())
                .with_attr(attr::DELETABLE, true)
                .with_payload(payload),
        )
    }

    /// Merges the grant snapshot into the store. Memory is authoritative,
    /// so a failed merge only gets a warning with the grant id.
    async fn write_through(&self, grant: &Grant) {
        let entry = match Self::entry_for(grant) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(grant_id = %grant.grant_id, error = %err, "grant write-through skipped");
                return;
            }
        };
        if let Err(err) = self.store.merge(entry).await {
            warn!(grant_id = %grant.grant_id, error = %err, "grant write-through failed");
        }
    }

    /// Registers a new grant: persists the durable entry, then indexes the
    /// in-memory copy.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the entry cannot be persisted; the grant
    /// is not indexed in that case.
    pub async fn create_grant(&self, grant: Grant) -> Result<(), AuthError> {
        let entry = Self::entry_for(&grant)?;
        self.store.persist(entry).await?;

        let mut inner = self.index();
        if let Some(code) = &grant.code {
            inner.by_code.insert(code.value.clone(), grant.grant_id);
        }
        if let Some(auth_req_id) = &grant.auth_req_id {
            inner
                .by_auth_req_id
                .insert(auth_req_id.clone(), grant.grant_id);
        }
        debug!(grant_id = %grant.grant_id, client_id = %grant.client_id, "grant created");
        inner.grants.insert(grant.grant_id, grant);
        Ok(())
    }

    /// Returns a snapshot of the grant, if live.
    #[must_use]
    pub fn grant(&self, grant_id: Uuid) -> Option<Grant> {
        self.index().grants.get(&grant_id).cloned()
    }

    /// Returns a snapshot of the grant that issued the access token.
    ///
    /// The indexed grant is confirmed to actually carry the token, so a
    /// stale index entry can never validate a foreign value.
    #[must_use]
    pub fn grant_by_access_token(&self, token_value: &str) -> Option<Grant> {
        let inner = self.index();
        let grant_id = inner.by_access_token.get(token_value)?;
        let grant = inner.grants.get(grant_id)?;
        grant.access_token(token_value)?;
        Some(grant.clone())
    }

    /// Returns a snapshot of the grant that issued the refresh token,
    /// looked up by the hash of the presented plaintext.
    #[must_use]
    pub fn grant_by_refresh_token(&self, plaintext: &str) -> Option<Grant> {
        let hash = RefreshToken::hash(plaintext);
        let inner = self.index();
        let grant_id = inner.by_refresh_hash.get(&hash)?;
        let grant = inner.grants.get(grant_id)?;
        grant.refresh_token_by_hash(&hash)?;
        Some(grant.clone())
    }

    /// Returns a snapshot of the grant created for a CIBA authentication
    /// request.
    #[must_use]
    pub fn grant_by_auth_req_id(&self, auth_req_id: &str) -> Option<Grant> {
        let inner = self.index();
        let grant_id = inner.by_auth_req_id.get(auth_req_id)?;
        inner.grants.get(grant_id).cloned()
    }

    /// Attempts to consume an authorization code.
    ///
    /// Exactly one caller ever observes [`CodeConsumption::Consumed`] for
    /// a given code; every later attempt sees `Replayed` and the grant's
    /// tokens revoked. The consumed mark is set and checked under one
    /// lock, so concurrent exchanges cannot both win.
    pub async fn consume_code(&self, code_value: &str) -> CodeConsumption {
        let outcome = {
            let mut inner = self.index();
            let Some(&grant_id) = inner.by_code.get(code_value) else {
                return CodeConsumption::NotFound;
            };
            let Some(grant) = inner.grants.get_mut(&grant_id) else {
                return CodeConsumption::NotFound;
            };
            let Some(code) = grant.code.as_mut() else {
                return CodeConsumption::NotFound;
            };

            if code.is_consumed() {
                warn!(grant_id = %grant_id, "authorization code replayed, revoking grant tokens");
                grant.revoke_all_tokens();
                CodeConsumption::Replayed(grant.clone())
            } else if code.is_expired() {
                return CodeConsumption::Expired;
            } else {
                code.consumed_at = Some(time::OffsetDateTime::now_utc());
                CodeConsumption::Consumed(grant.clone())
            }
        };

        match &outcome {
            CodeConsumption::Consumed(grant) | CodeConsumption::Replayed(grant) => {
                self.write_through(grant).await;
            }
            _ => {}
        }
        outcome
    }

    /// Records an access token under the grant and indexes its value.
    ///
    /// Uniqueness is enforced against every live token, including revoked
    /// ones, so a regenerated value can never shadow an old credential.
    pub async fn insert_access_token(&self, grant_id: Uuid, token: AccessToken) -> TokenInsert {
        let snapshot = {
            let mut inner = self.index();
            if inner.by_access_token.contains_key(&token.data.value) {
                return TokenInsert::Collision;
            }
            let Some(grant) = inner.grants.get_mut(&grant_id) else {
                return TokenInsert::GrantNotFound;
            };
            let value = token.data.value.clone();
            grant.access_tokens.push(token);
            let snapshot = grant.clone();
            inner.by_access_token.insert(value, grant_id);
            snapshot
        };
        self.write_through(&snapshot).await;
        TokenInsert::Inserted
    }

    /// Records a refresh token under the grant, revoking the rotated-out
    /// predecessor (by hash) in the same critical section.
    ///
    /// The old hash stays indexed so a client presenting the superseded
    /// token still resolves to its revoked record rather than vanishing.
    pub async fn insert_refresh_token(
        &self,
        grant_id: Uuid,
        token: RefreshToken,
        rotated_from: Option<&str>,
    ) -> TokenInsert {
        let snapshot = {
            let mut inner = self.index();
            if inner.by_refresh_hash.contains_key(&token.data.value) {
                return TokenInsert::Collision;
            }
            let Some(grant) = inner.grants.get_mut(&grant_id) else {
                return TokenInsert::GrantNotFound;
            };
            if let Some(old_hash) = rotated_from
                && let Some(old) = grant
                    .refresh_tokens
                    .iter_mut()
                    .find(|t| t.data.value == old_hash)
            {
                old.data.revoke();
            }
            let hash = token.data.value.clone();
            grant.refresh_tokens.push(token);
            let snapshot = grant.clone();
            inner.by_refresh_hash.insert(hash, grant_id);
            snapshot
        };
        self.write_through(&snapshot).await;
        TokenInsert::Inserted
    }

    /// Records an ID token under the grant. ID tokens are not indexed;
    /// they are validated by signature, not by lookup.
    pub async fn insert_id_token(&self, grant_id: Uuid, token: IdToken) -> TokenInsert {
        let snapshot = {
            let mut inner = self.index();
            let Some(grant) = inner.grants.get_mut(&grant_id) else {
                return TokenInsert::GrantNotFound;
            };
            grant.id_tokens.push(token);
            grant.clone()
        };
        self.write_through(&snapshot).await;
        TokenInsert::Inserted
    }

    /// Revokes every token issued under the grant. Returns `false` if the
    /// grant is not live.
    pub async fn revoke_grant_tokens(&self, grant_id: Uuid) -> bool {
        let snapshot = {
            let mut inner = self.index();
            let Some(grant) = inner.grants.get_mut(&grant_id) else {
                return false;
            };
            grant.revoke_all_tokens();
            grant.clone()
        };
        debug!(grant_id = %grant_id, "grant tokens revoked");
        self.write_through(&snapshot).await;
        true
    }

    /// Removes a grant and every index key that points at it, then removes
    /// the durable entry. Idempotent.
    pub async fn remove_grant(&self, grant_id: Uuid) {
        let removed = {
            let mut inner = self.index();
            let Some(grant) = inner.grants.remove(&grant_id) else {
                return;
            };
            if let Some(code) = &grant.code {
                inner.by_code.remove(&code.value);
            }
            for token in &grant.access_tokens {
                inner.by_access_token.remove(&token.data.value);
            }
            for token in &grant.refresh_tokens {
                inner.by_refresh_hash.remove(&token.data.value);
            }
            if let Some(auth_req_id) = &grant.auth_req_id {
                inner.by_auth_req_id.remove(auth_req_id);
            }
            grant
        };

        debug!(grant_id = %grant_id, client_id = %removed.client_id, "grant removed");
        let key = EntryKey::new(grant_id.to_string(), EntryKind::Grant);
        if let Err(err) = self.store.remove(&key).await {
            warn!(grant_id = %grant_id, error = %err, "durable grant removal failed");
        }
    }

    /// Removes every grant tied to the given session. Returns the number
    /// of grants removed.
    pub async fn remove_grants_by_session(&self, session_id: &str) -> usize {
        let grant_ids: Vec<Uuid> = {
            let inner = self.index();
            inner
                .grants
                .values()
                .filter(|g| g.session_id.as_deref() == Some(session_id))
                .map(|g| g.grant_id)
                .collect()
        };
        for grant_id in &grant_ids {
            self.remove_grant(*grant_id).await;
        }
        grant_ids.len()
    }

    /// Number of live grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index().grants.len()
    }

    /// Returns `true` if no grants are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index().grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::token::generate_token_value;
    use crate::types::GrantType;
    use gatehouse_storage::InMemoryEntryStore;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> GrantRegistry {
        GrantRegistry::new(Arc::new(InMemoryEntryStore::new()))
    }

    fn code_grant() -> Grant {
        let scopes: BTreeSet<String> = ["openid".to_string()].into();
        Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes,
        )
        .with_code(Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = registry();
        let grant = code_grant();
        let grant_id = grant.grant_id;
        let code = grant.code.as_ref().unwrap().value.clone();

        registry.create_grant(grant).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.grant(grant_id).is_some());

        match registry.consume_code(&code).await {
            CodeConsumption::Consumed(g) => assert_eq!(g.grant_id, grant_id),
            other => panic!("expected Consumed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_code_replay_revokes_tokens() {
        let registry = registry();
        let grant = code_grant();
        let grant_id = grant.grant_id;
        let code = grant.code.as_ref().unwrap().value.clone();
        registry.create_grant(grant).await.unwrap();

        assert!(matches!(
            registry.consume_code(&code).await,
            CodeConsumption::Consumed(_)
        ));

        let token = AccessToken::new(
            generate_token_value(),
            Duration::from_secs(3600),
            vec!["openid".to_string()],
        );
        let value = token.data.value.clone();
        assert_eq!(
            registry.insert_access_token(grant_id, token).await,
            TokenInsert::Inserted
        );
        assert!(registry.grant_by_access_token(&value).is_some());

        // Replay revokes everything issued under the grant.
        match registry.consume_code(&code).await {
            CodeConsumption::Replayed(g) => {
                assert!(g.access_tokens.iter().all(|t| t.data.is_revoked()));
            }
            other => panic!("expected Replayed, got {other:?}"),
        }
        let grant = registry.grant_by_access_token(&value).unwrap();
        assert!(!grant.access_token(&value).unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_expired_code_is_not_consumed() {
        let registry = registry();
        let scopes: BTreeSet<String> = ["openid".to_string()].into();
        let grant = Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes,
        )
        .with_code(Duration::ZERO);
        let code = grant.code.as_ref().unwrap().value.clone();
        registry.create_grant(grant).await.unwrap();

        assert!(matches!(
            registry.consume_code(&code).await,
            CodeConsumption::Expired
        ));
        // Still not consumed, so a retry sees the same outcome.
        assert!(matches!(
            registry.consume_code(&code).await,
            CodeConsumption::Expired
        ));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let registry = registry();
        assert!(matches!(
            registry.consume_code("no-such-code").await,
            CodeConsumption::NotFound
        ));
    }

    #[tokio::test]
    async fn test_access_token_collision_rejected() {
        let registry = registry();
        let grant_a = code_grant();
        let grant_b = code_grant();
        let id_a = grant_a.grant_id;
        let id_b = grant_b.grant_id;
        registry.create_grant(grant_a).await.unwrap();
        registry.create_grant(grant_b).await.unwrap();

        let value = generate_token_value();
        let token = AccessToken::new(value.clone(), Duration::from_secs(60), vec![]);
        assert_eq!(
            registry.insert_access_token(id_a, token.clone()).await,
            TokenInsert::Inserted
        );
        assert_eq!(
            registry.insert_access_token(id_b, token).await,
            TokenInsert::Collision
        );
        // The colliding insert left grant B untouched.
        assert!(registry.grant(id_b).unwrap().access_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rotation_revokes_predecessor() {
        let registry = registry();
        let grant = code_grant();
        let grant_id = grant.grant_id;
        registry.create_grant(grant).await.unwrap();

        let first_plain = generate_token_value();
        let first = RefreshToken::from_plaintext(&first_plain, Duration::from_secs(3600));
        let first_hash = first.data.value.clone();
        registry.insert_refresh_token(grant_id, first, None).await;

        let second_plain = generate_token_value();
        let second = RefreshToken::from_plaintext(&second_plain, Duration::from_secs(3600));
        assert_eq!(
            registry
                .insert_refresh_token(grant_id, second, Some(&first_hash))
                .await,
            TokenInsert::Inserted
        );

        // Old token still resolves but is revoked; new token is valid.
        let grant = registry.grant_by_refresh_token(&first_plain).unwrap();
        assert!(!grant.refresh_token_by_hash(&first_hash).unwrap().is_valid());
        let grant = registry.grant_by_refresh_token(&second_plain).unwrap();
        assert!(
            grant
                .refresh_token_by_hash(&RefreshToken::hash(&second_plain))
                .unwrap()
                .is_valid()
        );
    }

    #[tokio::test]
    async fn test_remove_grant_drops_every_index() {
        let registry = registry();
        let grant = code_grant();
        let grant_id = grant.grant_id;
        let code = grant.code.as_ref().unwrap().value.clone();
        registry.create_grant(grant).await.unwrap();

        let value = generate_token_value();
        let token = AccessToken::new(value.clone(), Duration::from_secs(60), vec![]);
        registry.insert_access_token(grant_id, token).await;

        registry.remove_grant(grant_id).await;
        assert!(registry.is_empty());
        assert!(registry.grant_by_access_token(&value).is_none());
        assert!(matches!(
            registry.consume_code(&code).await,
            CodeConsumption::NotFound
        ));

        // Idempotent.
        registry.remove_grant(grant_id).await;
    }

    #[tokio::test]
    async fn test_remove_grants_by_session() {
        let registry = registry();
        let grant = code_grant().with_session_id("sess-1");
        let other = code_grant().with_session_id("sess-2");
        registry.create_grant(grant).await.unwrap();
        registry.create_grant(other).await.unwrap();

        assert_eq!(registry.remove_grants_by_session("sess-1").await, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove_grants_by_session("sess-1").await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_code_consumption_single_winner() {
        let registry = Arc::new(registry());
        let grant = code_grant();
        let code = grant.code.as_ref().unwrap().value.clone();
        registry.create_grant(grant).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let code = code.clone();
            handles.push(tokio::spawn(
                async move { registry.consume_code(&code).await },
            ));
        }

        let mut consumed = 0;
        let mut replayed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                CodeConsumption::Consumed(_) => consumed += 1,
                CodeConsumption::Replayed(_) => replayed += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(consumed, 1);
        assert_eq!(replayed, 7);
    }
}
