use crate::model::Session;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub const IDENTITY_COOKIE: &str = "auth_user";
pub const TOKEN_COOKIE: &str = "token";
pub const SIGNUP_CONFIRMATION_COOKIE: &str = "signup_confirmation";
pub const SESSION_COOKIES: [&str; 3] = [IDENTITY_COOKIE, TOKEN_COOKIE, SIGNUP_CONFIRMATION_COOKIE];

pub const CACHED_USER_KEY: &str = "cached_user";
pub const CAN_ACCESS_CONFIRMATION_KEY: &str = "can_access_confirmation";
pub const LAST_INTERACTION_KEY: &str = "last_interaction_at";
const RESEND_TIMER_PREFIX: &str = "resend_timer:";

pub fn resend_timer_key(email: &str) -> String {
    format!("{RESEND_TIMER_PREFIX}{}", email.trim().to_ascii_lowercase())
}

/// Keeps the signed-in user in the local area for other clients of the same
/// state file.
pub fn cache_user(storage: &dyn ClientStorage, session: &Session) {
    match serde_json::to_string(session) {
        Ok(raw) => storage.set_local(CACHED_USER_KEY, raw),
        Err(error) => warn!("cached user not written: {error}"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StoredCookie {
    pub value: String,
    #[serde(default)]
    pub max_age_secs: Option<i64>,
    #[serde(default)]
    pub set_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    pub fn session(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            max_age_secs: None,
            set_at: Some(Utc::now()),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match (self.max_age_secs, self.set_at) {
            (Some(max_age), _) if max_age <= 0 => false,
            (Some(max_age), Some(set_at)) => (now - set_at).num_seconds() < max_age,
            _ => true,
        }
    }

    fn expire(&mut self) {
        self.value.clear();
        self.max_age_secs = Some(0);
        self.set_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, Eq, PartialEq)]
pub struct ClientState {
    #[serde(default)]
    pub cookies: BTreeMap<String, StoredCookie>,
    #[serde(default)]
    pub local: BTreeMap<String, String>,
}

/// Client-held session artifacts: cookies plus a local key/value area.
pub trait ClientStorage: Send + Sync {
    fn cookie(&self, name: &str) -> Option<String>;
    fn set_cookie(&self, name: &str, cookie: StoredCookie);
    /// Sets the cookie's lifetime to zero. Unknown names are recorded as
    /// expired too.
    fn expire_cookie(&self, name: &str);
    fn local(&self, key: &str) -> Option<String>;
    fn set_local(&self, key: &str, value: String);
    fn remove_local(&self, key: &str);
    fn snapshot(&self) -> ClientState;

    /// Live cookies formatted for a `Cookie` request header.
    fn cookie_header(&self) -> Option<String> {
        let now = Utc::now();
        let pairs = self
            .snapshot()
            .cookies
            .into_iter()
            .filter(|(_, cookie)| cookie.is_live(now) && !cookie.value.is_empty())
            .map(|(name, cookie)| format!("{name}={}", cookie.value))
            .collect::<Vec<_>>();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

fn lock(state: &Mutex<ClientState>) -> MutexGuard<'_, ClientState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn live_cookie(state: &ClientState, name: &str) -> Option<String> {
    state
        .cookies
        .get(name)
        .filter(|cookie| cookie.is_live(Utc::now()))
        .map(|cookie| cookie.value.clone())
}

fn expire_in(state: &mut ClientState, name: &str) {
    state
        .cookies
        .entry(name.to_string())
        .or_insert_with(|| StoredCookie::session(String::new()))
        .expire();
}

#[derive(Debug, Clone, Default)]
pub struct MemoryClientStorage {
    state: Arc<Mutex<ClientState>>,
}

impl MemoryClientStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStorage for MemoryClientStorage {
    fn cookie(&self, name: &str) -> Option<String> {
        live_cookie(&lock(&self.state), name)
    }

    fn set_cookie(&self, name: &str, cookie: StoredCookie) {
        lock(&self.state).cookies.insert(name.to_string(), cookie);
    }

    fn expire_cookie(&self, name: &str) {
        expire_in(&mut lock(&self.state), name);
    }

    fn local(&self, key: &str) -> Option<String> {
        lock(&self.state).local.get(key).cloned()
    }

    fn set_local(&self, key: &str, value: String) {
        lock(&self.state).local.insert(key.to_string(), value);
    }

    fn remove_local(&self, key: &str) {
        lock(&self.state).local.remove(key);
    }

    fn snapshot(&self) -> ClientState {
        lock(&self.state).clone()
    }
}

/// JSON-file backed storage. Every mutation is written through; write errors
/// are logged and the in-memory state stays authoritative.
#[derive(Debug, Clone)]
pub struct FileClientStorage {
    path: PathBuf,
    state: Arc<Mutex<ClientState>>,
}

impl FileClientStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read client state {}", path.display()))?;
            if raw.trim().is_empty() {
                ClientState::default()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse client state {}", path.display()))?
            }
        } else {
            ClientState::default()
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(&self, apply: impl FnOnce(&mut ClientState)) {
        let snapshot = {
            let mut state = lock(&self.state);
            apply(&mut state);
            state.clone()
        };
        if let Err(error) = self.persist(&snapshot) {
            warn!("client state not saved: {error:#}");
        }
    }

    fn persist(&self, state: &ClientState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(state).context("failed to encode client state")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write client state {}", self.path.display()))
    }
}

impl ClientStorage for FileClientStorage {
    fn cookie(&self, name: &str) -> Option<String> {
        live_cookie(&lock(&self.state), name)
    }

    fn set_cookie(&self, name: &str, cookie: StoredCookie) {
        self.mutate(|state| {
            state.cookies.insert(name.to_string(), cookie);
        });
    }

    fn expire_cookie(&self, name: &str) {
        self.mutate(|state| expire_in(state, name));
    }

    fn local(&self, key: &str) -> Option<String> {
        lock(&self.state).local.get(key).cloned()
    }

    fn set_local(&self, key: &str, value: String) {
        self.mutate(|state| {
            state.local.insert(key.to_string(), value);
        });
    }

    fn remove_local(&self, key: &str) {
        self.mutate(|state| {
            state.local.remove(key);
        });
    }

    fn snapshot(&self) -> ClientState {
        lock(&self.state).clone()
    }
}
