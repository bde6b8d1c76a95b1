use crate::session::SessionStore;
use crate::storage::{
    CACHED_USER_KEY, CAN_ACCESS_CONFIRMATION_KEY, ClientStorage, IDENTITY_COOKIE,
    LAST_INTERACTION_KEY, SESSION_COOKIES, resend_timer_key,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Best-effort server notification. Implementations must not block.
pub trait LogoutNotifier: Send + Sync {
    fn notify_logout(&self);
}

#[derive(Debug, Deserialize)]
struct IdentityCookie {
    #[serde(default)]
    email: Option<String>,
}

/// Clears every client-held session artifact.
pub struct LogoutCleaner<N> {
    storage: Arc<dyn ClientStorage>,
    store: SessionStore,
    notifier: N,
}

impl<N: LogoutNotifier> LogoutCleaner<N> {
    pub fn new(storage: Arc<dyn ClientStorage>, store: SessionStore, notifier: N) -> Self {
        Self {
            storage,
            store,
            notifier,
        }
    }

    /// Local cleanup completes before this returns; the server call does not
    /// have to. Running it again only re-clears already cleared state.
    pub fn logout(&self) {
        let email = self.email_at_logout();
        self.notifier.notify_logout();

        for key in [CACHED_USER_KEY, LAST_INTERACTION_KEY, CAN_ACCESS_CONFIRMATION_KEY] {
            self.storage.remove_local(key);
        }
        if let Some(email) = &email {
            self.storage.remove_local(&resend_timer_key(email));
        }
        for name in SESSION_COOKIES {
            self.storage.expire_cookie(name);
        }

        let username = self.store.username();
        self.store.clear();
        match username {
            Some(username) => info!("logged out {username}"),
            None => debug!("logout with no active session"),
        }
    }

    fn email_at_logout(&self) -> Option<String> {
        self.storage
            .cookie(IDENTITY_COOKIE)
            .and_then(|raw| serde_json::from_str::<IdentityCookie>(&raw).ok())
            .and_then(|identity| identity.email)
            .or_else(|| self.store.current().and_then(|session| session.email))
            .filter(|email| !email.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{LogoutCleaner, LogoutNotifier};
    use crate::model::Session;
    use crate::session::tests::FakeSource;
    use crate::session::{SessionStore, probe_session};
    use crate::storage::{
        CACHED_USER_KEY, CAN_ACCESS_CONFIRMATION_KEY, ClientStorage, IDENTITY_COOKIE,
        LAST_INTERACTION_KEY, MemoryClientStorage, SESSION_COOKIES, SIGNUP_CONFIRMATION_COOKIE,
        StoredCookie, TOKEN_COOKIE, resend_timer_key,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CountingNotifier(Arc<AtomicUsize>);

    impl LogoutNotifier for CountingNotifier {
        fn notify_logout(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn signed_in() -> (MemoryClientStorage, SessionStore) {
        let storage = MemoryClientStorage::new();
        storage.set_cookie(
            IDENTITY_COOKIE,
            StoredCookie::session(r#"{"username":"alice","email":"cookie@example.com"}"#),
        );
        storage.set_cookie(TOKEN_COOKIE, StoredCookie::session("jwt"));
        storage.set_cookie(SIGNUP_CONFIRMATION_COOKIE, StoredCookie::session("1"));
        storage.set_local(CACHED_USER_KEY, "{}".to_string());
        storage.set_local(LAST_INTERACTION_KEY, "2026-10-19T10:00:00Z".to_string());
        storage.set_local(CAN_ACCESS_CONFIRMATION_KEY, "true".to_string());
        storage.set_local(&resend_timer_key("cookie@example.com"), "42".to_string());
        storage.set_local("theme", "dark".to_string());

        let store = SessionStore::new();
        store.set(Session {
            username: "alice".to_string(),
            email: Some("session@example.com".to_string()),
            role: None,
            plan: Some("pro".to_string()),
        });
        (storage, store)
    }

    #[test]
    fn logout_clears_all_session_artifacts() {
        let (storage, store) = signed_in();
        let notifier = CountingNotifier::default();
        let cleaner = LogoutCleaner::new(Arc::new(storage.clone()), store.clone(), notifier.clone());

        cleaner.logout();

        assert!(!store.is_active());
        for name in SESSION_COOKIES {
            assert_eq!(storage.cookie(name), None, "{name} still live");
            assert_eq!(storage.snapshot().cookies[name].max_age_secs, Some(0));
        }
        let local = storage.snapshot().local;
        assert_eq!(local.len(), 1);
        assert_eq!(local.get("theme").map(String::as_str), Some("dark"));
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resend_timer_falls_back_to_session_email() {
        let (storage, store) = signed_in();
        storage.expire_cookie(IDENTITY_COOKIE);
        storage.set_local(&resend_timer_key("session@example.com"), "9".to_string());
        let cleaner = LogoutCleaner::new(Arc::new(storage.clone()), store, CountingNotifier::default());

        cleaner.logout();

        assert_eq!(storage.local(&resend_timer_key("session@example.com")), None);
    }

    #[test]
    fn logout_twice_matches_logout_once() {
        let (storage, store) = signed_in();
        let cleaner = LogoutCleaner::new(Arc::new(storage.clone()), store.clone(), CountingNotifier::default());

        cleaner.logout();
        let once = storage.snapshot();
        cleaner.logout();
        let twice = storage.snapshot();

        assert_eq!(once.local, twice.local);
        assert_eq!(
            once.cookies.keys().collect::<Vec<_>>(),
            twice.cookies.keys().collect::<Vec<_>>()
        );
        assert!(twice.cookies.values().all(|cookie| cookie.max_age_secs == Some(0)));
        assert!(!store.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_in_flight_during_logout_does_not_sign_back_in() {
        let (storage, store) = signed_in();
        let cleaner = LogoutCleaner::new(
            Arc::new(storage.clone()),
            store.clone(),
            CountingNotifier::default(),
        );
        let source = FakeSource {
            identity_delay: Duration::from_millis(500),
            ..FakeSource::signed_in("alice", Some("pro"))
        };
        let probe = {
            let store = store.clone();
            tokio::spawn(async move { probe_session(&source, &store).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cleaner.logout();

        assert!(probe.await.unwrap().is_none());
        assert!(!store.is_active());
        assert_eq!(storage.cookie(TOKEN_COOKIE), None);
    }
}
