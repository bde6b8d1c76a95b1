use crate::model::{Session, UserStatus, VerifiedIdentity};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

/// Remote source of truth for identity and plan.
pub trait SessionSource: Send + Sync {
    fn verify_token(&self) -> impl Future<Output = Result<VerifiedIdentity>> + Send;
    fn user_status(&self) -> impl Future<Output = Result<UserStatus>> + Send;
}

/// In-memory holder of the current session, shared between the page
/// controller, the status poller and the logout path. Readers either take a
/// snapshot or subscribe to changes.
///
/// Every `clear` starts a new epoch. Probe results are only accepted for the
/// epoch they were started in, so a probe that outlives a logout cannot bring
/// the session back.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Option<Session>>>,
    epoch: Arc<AtomicU64>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn username(&self) -> Option<String> {
        self.tx
            .borrow()
            .as_ref()
            .map(|session| session.username.clone())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn set(&self, session: Session) {
        self.tx.send_replace(Some(session));
    }

    /// Writes a probe result started in `epoch`. Returns false, leaving the
    /// store untouched, when a `clear` happened since.
    pub fn apply_probe(&self, epoch: u64, session: Option<Session>) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|current| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            accepted = true;
            match session {
                Some(session) => {
                    *current = Some(session);
                    true
                }
                None => {
                    self.epoch.fetch_add(1, Ordering::SeqCst);
                    current.take().is_some()
                }
            }
        });
        accepted
    }

    /// Refreshes the plan of the active session. Returns false, without
    /// touching anything, while no session is present.
    pub fn update_plan(&self, plan: String) -> bool {
        self.tx.send_if_modified(|current| match current {
            Some(session) if session.plan.as_deref() != Some(plan.as_str()) => {
                session.plan = Some(plan);
                true
            }
            _ => false,
        });
        self.is_active()
    }

    /// Drops the session and invalidates every probe still in flight, even
    /// when the store was already empty.
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            current.take().is_some()
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

/// One-shot identity check. Never fails: transport errors, non-2xx
/// responses and identities without a username all count as signed out.
pub async fn check_session<S: SessionSource>(source: &S) -> Option<Session> {
    match source.verify_token().await {
        Ok(identity) => identity.into_session(),
        Err(error) => {
            debug!("session probe failed: {error:#}");
            None
        }
    }
}

/// Runs one probe and writes its result to `store` exactly once. A result
/// that arrives after the store was cleared is dropped and reported as `None`.
pub async fn probe_session<S: SessionSource>(source: &S, store: &SessionStore) -> Option<Session> {
    let epoch = store.epoch();
    let session = check_session(source).await;
    if !store.apply_probe(epoch, session.clone()) {
        debug!("discarding session probe started before the last sign-out");
        return None;
    }
    match &session {
        Some(session) => info!("session established for {}", session.username),
        None => info!("no active session"),
    }
    session
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{SessionSource, SessionStore, check_session, probe_session};
    use crate::model::{Session, UserStatus, VerifiedIdentity};
    use anyhow::{Result, anyhow};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Debug)]
    pub(crate) enum StatusReply {
        Plan(String),
        NoPlan,
        Unauthorized,
    }

    /// Scripted source: identity is fixed, status replies are consumed in
    /// order with an optional per-reply delay. Once the script runs out the
    /// last reply repeats.
    #[derive(Clone, Default)]
    pub(crate) struct FakeSource {
        pub identity: Option<VerifiedIdentity>,
        pub identity_delay: Duration,
        pub status_script: Arc<Mutex<VecDeque<(Duration, StatusReply)>>>,
        pub last_status: Arc<Mutex<Option<(Duration, StatusReply)>>>,
        pub status_calls: Arc<AtomicUsize>,
    }

    impl FakeSource {
        pub fn signed_in(username: &str, plan: Option<&str>) -> Self {
            Self {
                identity: Some(VerifiedIdentity {
                    username: Some(username.to_string()),
                    email: Some(format!("{username}@example.com")),
                    role: Some("user".to_string()),
                    plan: plan.map(str::to_string),
                }),
                ..Self::default()
            }
        }

        /// `None` plan simulates a failed (401) tick.
        pub fn push_status(&self, delay: Duration, plan: Option<&str>) {
            let reply = match plan {
                Some(plan) => StatusReply::Plan(plan.to_string()),
                None => StatusReply::Unauthorized,
            };
            self.push_reply(delay, reply);
        }

        pub fn push_reply(&self, delay: Duration, reply: StatusReply) {
            self.status_script.lock().unwrap().push_back((delay, reply));
        }

        pub fn calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    impl SessionSource for FakeSource {
        async fn verify_token(&self) -> Result<VerifiedIdentity> {
            if !self.identity_delay.is_zero() {
                tokio::time::sleep(self.identity_delay).await;
            }
            self.identity.clone().ok_or_else(|| anyhow!("401 Unauthorized"))
        }

        async fn user_status(&self) -> Result<UserStatus> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.status_script.lock().unwrap();
                let mut last = self.last_status.lock().unwrap();
                match script.pop_front() {
                    Some(reply) => {
                        *last = Some(reply.clone());
                        Some(reply)
                    }
                    None => last.clone(),
                }
            };
            let Some((delay, reply)) = next else {
                return Err(anyhow!("no scripted status"));
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match reply {
                StatusReply::Plan(plan) => Ok(UserStatus { plan: Some(plan) }),
                StatusReply::NoPlan => Ok(UserStatus { plan: None }),
                StatusReply::Unauthorized => Err(anyhow!("401 Unauthorized")),
            }
        }
    }

    fn alice() -> Session {
        Session {
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            role: None,
            plan: Some("free".to_string()),
        }
    }

    #[test]
    fn plan_updates_are_ignored_without_session() {
        let store = SessionStore::new();
        assert!(!store.update_plan("pro".to_string()));
        assert!(store.current().is_none());

        store.set(alice());
        assert!(store.update_plan("pro".to_string()));
        assert_eq!(store.current().and_then(|s| s.plan), Some("pro".to_string()));
    }

    #[test]
    fn clear_notifies_subscribers_once() {
        let store = SessionStore::new();
        store.set(alice());
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.clear();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        store.clear();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn probe_populates_store() {
        let store = SessionStore::new();
        let source = FakeSource::signed_in("alice", Some("pro"));
        let session = probe_session(&source, &store).await.expect("session");
        assert_eq!(session.username, "alice");
        assert_eq!(store.username().as_deref(), Some("alice"));
        assert_eq!(store.current().and_then(|s| s.plan).as_deref(), Some("pro"));
    }

    #[tokio::test]
    async fn failed_probe_clears_store() {
        let store = SessionStore::new();
        store.set(alice());
        let source = FakeSource::default();
        assert!(check_session(&source).await.is_none());
        assert!(probe_session(&source, &store).await.is_none());
        assert!(!store.is_active());
    }

    #[tokio::test]
    async fn blank_username_counts_as_signed_out() {
        let store = SessionStore::new();
        let source = FakeSource {
            identity: Some(VerifiedIdentity {
                username: Some(String::new()),
                ..VerifiedIdentity::default()
            }),
            ..FakeSource::default()
        };
        assert!(probe_session(&source, &store).await.is_none());
        assert!(!store.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_finishing_after_clear_is_dropped() {
        let store = SessionStore::new();
        let source = FakeSource {
            identity_delay: Duration::from_millis(500),
            ..FakeSource::signed_in("alice", Some("pro"))
        };
        let probe = {
            let store = store.clone();
            tokio::spawn(async move { probe_session(&source, &store).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.clear();

        assert!(probe.await.unwrap().is_none());
        assert!(!store.is_active());
    }

    #[tokio::test]
    async fn probe_started_after_clear_is_accepted() {
        let store = SessionStore::new();
        store.clear();
        let source = FakeSource::signed_in("alice", None);
        assert!(probe_session(&source, &store).await.is_some());
        assert!(store.is_active());
    }
}
