use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AppStatus {
    Running,
    Stopped,
    Unknown,
}

impl AppStatus {
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "running" | "up" | "started" => Self::Running,
            "stopped" | "exited" | "down" | "created" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LifecycleAction {
    Start,
    Restart,
    Stop,
    Delete,
}

impl LifecycleAction {
    /// Menu order.
    pub const ALL: [Self; 4] = [Self::Start, Self::Restart, Self::Stop, Self::Delete];

    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Restart => "restart",
            Self::Stop => "stop",
            Self::Delete => "delete",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Restart => "Restart",
            Self::Stop => "Stop",
            Self::Delete => "Delete",
        }
    }

    pub fn hotkey(self) -> char {
        match self {
            Self::Start => 's',
            Self::Restart => 'r',
            Self::Stop => 'x',
            Self::Delete => 'd',
        }
    }

    pub fn from_hotkey(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.hotkey() == c)
    }

    /// Whether the action may be requested for an application in `status`.
    /// Delete is not gated by status.
    pub fn allowed_for(self, status: AppStatus) -> bool {
        match self {
            Self::Start => status != AppStatus::Running,
            Self::Restart | Self::Stop => status == AppStatus::Running,
            Self::Delete => true,
        }
    }
}

impl Display for LifecycleAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub status: AppStatus,
}

impl Application {
    pub fn new(id: impl Into<String>, status: AppStatus) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            status,
        }
    }

    pub fn matches_filter(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        let query_lower = query.to_ascii_lowercase();
        self.name.to_ascii_lowercase().contains(&query_lower)
            || self.id.to_ascii_lowercase().contains(&query_lower)
            || self.status.label().contains(&query_lower)
    }
}

/// Wire shape of one entry of `GET /api/apps`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApplicationRecord {
    #[serde(default, alias = "_id", alias = "appId")]
    pub id: Option<String>,
    #[serde(default, alias = "containerName", alias = "container_name")]
    pub container_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "state")]
    pub status: Option<String>,
}

impl ApplicationRecord {
    /// Backend id, falling back to the container name. Records with neither
    /// cannot be addressed and are skipped.
    pub fn into_application(self) -> Option<Application> {
        let id = non_empty(self.id).or_else(|| non_empty(self.container_name.clone()))?;
        let name = non_empty(self.name)
            .or_else(|| non_empty(self.container_name))
            .unwrap_or_else(|| id.clone());
        let status = self
            .status
            .as_deref()
            .map(AppStatus::from_token)
            .unwrap_or(AppStatus::Unknown);
        Some(Application { id, name, status })
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize)]
pub struct Session {
    pub username: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub plan: Option<String>,
}

impl Session {
    pub fn plan_label(&self) -> &str {
        self.plan.as_deref().unwrap_or("-")
    }
}

/// Body of `GET /api/verify-token`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VerifiedIdentity {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

impl VerifiedIdentity {
    /// A missing or blank username means the caller is not signed in.
    pub fn into_session(self) -> Option<Session> {
        let username = non_empty(self.username)?;
        Some(Session {
            username,
            email: non_empty(self.email),
            role: non_empty(self.role),
            plan: non_empty(self.plan),
        })
    }
}

/// Body of `GET /api/user/status`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserStatus {
    #[serde(default)]
    pub plan: Option<String>,
}

/// Body of `POST /api/app/{action}`.
#[derive(Debug, Clone, Deserialize, Default, Eq, PartialEq)]
pub struct ActionReceipt {
    #[serde(default)]
    pub message: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{AppStatus, ApplicationRecord, LifecycleAction, VerifiedIdentity};

    #[test]
    fn eligibility_follows_status() {
        assert!(LifecycleAction::Start.allowed_for(AppStatus::Stopped));
        assert!(LifecycleAction::Start.allowed_for(AppStatus::Unknown));
        assert!(!LifecycleAction::Start.allowed_for(AppStatus::Running));
        assert!(LifecycleAction::Stop.allowed_for(AppStatus::Running));
        assert!(!LifecycleAction::Stop.allowed_for(AppStatus::Stopped));
        assert!(!LifecycleAction::Restart.allowed_for(AppStatus::Unknown));
        assert!(LifecycleAction::Delete.allowed_for(AppStatus::Running));
        assert!(LifecycleAction::Delete.allowed_for(AppStatus::Unknown));
    }

    #[test]
    fn record_falls_back_to_container_name() {
        let record = ApplicationRecord {
            id: None,
            container_name: Some("web-1".to_string()),
            name: None,
            status: Some("Running".to_string()),
        };
        let app = record.into_application().expect("addressable");
        assert_eq!(app.id, "web-1");
        assert_eq!(app.name, "web-1");
        assert_eq!(app.status, AppStatus::Running);

        let orphan = ApplicationRecord {
            id: Some("  ".to_string()),
            ..ApplicationRecord::default()
        };
        assert!(orphan.into_application().is_none());
    }

    #[test]
    fn identity_without_username_is_not_a_session() {
        let identity: VerifiedIdentity =
            serde_json::from_str(r#"{"email":"a@b.c","plan":"pro"}"#).expect("json");
        assert!(identity.into_session().is_none());

        let identity: VerifiedIdentity =
            serde_json::from_str(r#"{"username":"alice","plan":" "}"#).expect("json");
        let session = identity.into_session().expect("session");
        assert_eq!(session.username, "alice");
        assert_eq!(session.plan, None);
    }
}
