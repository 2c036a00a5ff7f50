use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::claims;
use crate::error::Error;
use crate::store::KeyValueStore;
use crate::types::UserId;

/// The authenticated identity for one client instance.
///
/// Invariant: `logged_in` implies a non-empty `access_token` and
/// `expires_at > issued_at` (enforced by [`claims::decode`], the only path
/// that sets the flag).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub subject: String,
    pub user_id: UserId,
    pub issuer: String,
    pub audience: String,
    #[serde(with = "time::serde::timestamp::option")]
    pub issued_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::timestamp::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub token_id: String,
    pub access_token: String,
    pub logged_in: bool,
}

/// Owns the [`Session`] and its persisted copy.
///
/// Mutations within one instance are strictly sequential; the persisted
/// key-value namespace shared with sibling instances is last-write-wins
/// (see [`KeyValueStore`]). Nothing here arms timers; the session manager
/// wires token arrival to the refresh scheduler.
pub struct CredentialStore {
    session: Mutex<Session>,
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl CredentialStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            store,
            key: key.into(),
        }
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replace the session from a freshly issued token and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for a malformed token (the session is left
    /// untouched) or [`Error::Store`] if persisting fails.
    pub fn set_from_token(&self, token: &str) -> Result<claims::Claims, Error> {
        let claims = claims::decode(token)?;
        let session = Session {
            subject: claims.subject.clone(),
            user_id: claims.user_id.clone(),
            issuer: claims.issuer.clone(),
            audience: claims.audience.clone(),
            issued_at: Some(claims.issued_at),
            expires_at: Some(claims.expires_at),
            token_id: claims.token_id.clone(),
            access_token: token.to_string(),
            logged_in: true,
        };
        self.persist(&session)?;
        *self.session() = session;
        Ok(claims)
    }

    /// Refresh the session in place, preserving the identity fields
    /// (`subject`, `user_id`) already established at login.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`CredentialStore::set_from_token`].
    pub fn update_from_token(&self, token: &str) -> Result<claims::Claims, Error> {
        let claims = claims::decode(token)?;
        let updated = {
            let mut session = self.session();
            session.issuer = claims.issuer.clone();
            session.audience = claims.audience.clone();
            session.issued_at = Some(claims.issued_at);
            session.expires_at = Some(claims.expires_at);
            session.token_id = claims.token_id.clone();
            session.access_token = token.to_string();
            session.logged_in = true;
            session.clone()
        };
        self.persist(&updated)?;
        Ok(claims)
    }

    /// Reset the session to empty and remove the persisted copy.
    ///
    /// The in-memory state always clears; a store failure is reported after
    /// the fact.
    pub fn clear(&self) -> Result<(), Error> {
        *self.session() = Session::default();
        self.store
            .remove(&self.key)
            .map_err(|e| Error::Store(e.to_string()))
    }

    /// Load a persisted session at process start.
    ///
    /// Returns whether an authenticated session was installed. Unreadable
    /// persisted data is discarded (with a warning), not an error.
    pub fn restore(&self) -> Result<bool, Error> {
        let Some(text) = self
            .store
            .get(&self.key)
            .map_err(|e| Error::Store(e.to_string()))?
        else {
            return Ok(false);
        };

        match serde_json::from_str::<Session>(&text) {
            Ok(session) if session.logged_in && !session.access_token.is_empty() => {
                *self.session() = session;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted session");
                let _ = self.store.remove(&self.key);
                Ok(false)
            }
        }
    }

    /// Whether a signed-in session with a token is present. Says nothing
    /// about expiry; see [`CredentialStore::is_expired`].
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        let session = self.session();
        session.logged_in && !session.access_token.is_empty()
    }

    /// Whether the token's expiry has passed. A session without an expiry
    /// counts as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.session()
            .expires_at
            .is_none_or(|expires_at| OffsetDateTime::now_utc() >= expires_at)
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.session().expires_at
    }

    /// Remaining token lifetime; negative once expired, `None` without a
    /// session.
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<time::Duration> {
        self.session()
            .expires_at
            .map(|expires_at| expires_at - OffsetDateTime::now_utc())
    }

    /// The current access token, when one is present.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        let session = self.session();
        if session.access_token.is_empty() {
            None
        } else {
            Some(session.access_token.clone())
        }
    }

    /// Copy of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.session().clone()
    }

    fn persist(&self, session: &Session) -> Result<(), Error> {
        let text = serde_json::to_string(session).map_err(|e| Error::Store(e.to_string()))?;
        self.store
            .set(&self.key, &text)
            .map_err(|e| Error::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::testing;
    use crate::store::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    #[test]
    fn set_from_token_authenticates() {
        let credentials = CredentialStore::new(store(), "session");
        assert!(!credentials.is_authenticated());

        credentials
            .set_from_token(&testing::token(now(), now() + 1800))
            .unwrap();

        assert!(credentials.is_authenticated());
        assert!(!credentials.is_expired());
        let session = credentials.snapshot();
        assert_eq!(session.subject, "alice");
        assert_eq!(session.user_id, UserId("user-1".into()));
        assert!(session.expires_at > session.issued_at);
    }

    #[test]
    fn clear_deauthenticates_and_unpersists() {
        let kv = store();
        let credentials = CredentialStore::new(kv.clone(), "session");
        credentials
            .set_from_token(&testing::token(now(), now() + 1800))
            .unwrap();
        assert!(kv.get("session").unwrap().is_some());

        credentials.clear().unwrap();

        assert!(!credentials.is_authenticated());
        assert!(credentials.is_expired());
        assert_eq!(credentials.snapshot(), Session::default());
        assert!(kv.get("session").unwrap().is_none());
    }

    #[test]
    fn malformed_token_is_rejected_and_leaves_session_untouched() {
        let credentials = CredentialStore::new(store(), "session");
        credentials
            .set_from_token(&testing::token(now(), now() + 1800))
            .unwrap();

        let err = credentials.set_from_token("garbage").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(credentials.is_authenticated());
    }

    #[test]
    fn update_preserves_identity_fields() {
        let issued = now();
        let credentials = CredentialStore::new(store(), "session");
        credentials
            .set_from_token(&testing::token_for("alice", "user-1", issued, issued + 600))
            .unwrap();

        credentials
            .update_from_token(&testing::token_for("other", "user-9", issued, issued + 1800))
            .unwrap();

        let session = credentials.snapshot();
        assert_eq!(session.subject, "alice");
        assert_eq!(session.user_id, UserId("user-1".into()));
        assert_eq!(session.expires_at.unwrap().unix_timestamp(), issued + 1800);
    }

    #[test]
    fn restore_roundtrips_through_the_store() {
        let kv = store();
        {
            let credentials = CredentialStore::new(kv.clone(), "session");
            credentials
                .set_from_token(&testing::token(now(), now() + 1800))
                .unwrap();
        }

        let restored = CredentialStore::new(kv, "session");
        assert!(restored.restore().unwrap());
        assert!(restored.is_authenticated());
        assert_eq!(restored.snapshot().subject, "alice");
    }

    #[test]
    fn restore_discards_corrupt_state() {
        let kv = store();
        kv.set("session", "{ not json").unwrap();

        let credentials = CredentialStore::new(kv.clone(), "session");
        assert!(!credentials.restore().unwrap());
        assert!(!credentials.is_authenticated());
        assert!(kv.get("session").unwrap().is_none());
    }

    #[test]
    fn missing_expiry_counts_as_expired() {
        let credentials = CredentialStore::new(store(), "session");
        assert!(credentials.is_expired());
        assert_eq!(credentials.time_until_expiry(), None);
    }

    #[test]
    fn time_until_expiry_tracks_the_token() {
        let credentials = CredentialStore::new(store(), "session");
        credentials
            .set_from_token(&testing::token(now(), now() + 1800))
            .unwrap();

        let remaining = credentials.time_until_expiry().unwrap();
        assert!(remaining.whole_seconds() > 1790);
        assert!(remaining.whole_seconds() <= 1800);
    }
}
