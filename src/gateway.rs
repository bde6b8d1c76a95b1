use crate::dispatch::ActionPerformer;
use crate::logout::LogoutNotifier;
use crate::model::{
    ActionReceipt, Application, ApplicationRecord, LifecycleAction, UserStatus, VerifiedIdentity,
};
use crate::session::SessionSource;
use crate::storage::{ClientStorage, StoredCookie, TOKEN_COOKIE};
use anyhow::{Context, Result};
use chrono::Utc;
use cookie::Cookie;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LOGOUT_PATH: &str = "/api/logout";

/// HTTP client for the hosting API. Every request carries the live cookies
/// from client storage, and cookies set by responses are written back.
#[derive(Clone)]
pub struct HostingGateway {
    client: Client,
    base_url: String,
    storage: Arc<dyn ClientStorage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplicationList {
    Bare(Vec<ApplicationRecord>),
    Wrapped {
        #[serde(default, alias = "applications", alias = "containers")]
        apps: Vec<ApplicationRecord>,
    },
}

#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default, alias = "error")]
    message: Option<String>,
}

impl HostingGateway {
    pub fn new(base_url: &str, storage: Arc<dyn ClientStorage>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            storage,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.storage.cookie_header() {
            Some(cookies) => builder.header(COOKIE, cookies),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        self.absorb_cookies(&response);
        Ok(response)
    }

    /// Mirrors `Set-Cookie` headers into client storage. A zero or negative
    /// lifetime expires the cookie.
    fn absorb_cookies(&self, response: &Response) {
        for raw in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                continue;
            };
            let Ok(cookie) = Cookie::parse_encoded(raw) else {
                debug!("ignoring malformed set-cookie header");
                continue;
            };
            let now = Utc::now();
            let max_age_secs = cookie
                .max_age()
                .map(|max_age| max_age.whole_seconds())
                .or_else(|| {
                    cookie
                        .expires_datetime()
                        .map(|at| at.unix_timestamp() - now.timestamp())
                });
            if max_age_secs.is_some_and(|secs| secs <= 0) {
                debug!("server expired cookie {}", cookie.name());
                self.storage.expire_cookie(cookie.name());
                continue;
            }
            debug!("server set cookie {}", cookie.name());
            self.storage.set_cookie(
                cookie.name(),
                StoredCookie {
                    value: cookie.value().to_string(),
                    max_age_secs,
                    set_at: Some(now),
                },
            );
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .send(self.request(Method::GET, path))
            .await
            .with_context(|| format!("GET {path} failed"))?;
        let response = ensure_success(response, path).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode {path} response"))
    }

    pub async fn fetch_applications(&self) -> Result<Vec<Application>> {
        let list = self.get_json::<ApplicationList>("/api/apps").await?;
        let records = match list {
            ApplicationList::Bare(records) => records,
            ApplicationList::Wrapped { apps } => apps,
        };
        Ok(records
            .into_iter()
            .filter_map(ApplicationRecord::into_application)
            .collect())
    }

}

async fn send_logout(request: RequestBuilder) -> Result<()> {
    let response = request
        .send()
        .await
        .with_context(|| format!("POST {LOGOUT_PATH} failed"))?;
    ensure_success(response, LOGOUT_PATH).await?;
    Ok(())
}

async fn ensure_success(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        anyhow::bail!("{path} returned {status}");
    }
    anyhow::bail!("{path} returned {status}: {message}");
}

impl SessionSource for HostingGateway {
    async fn verify_token(&self) -> Result<VerifiedIdentity> {
        self.get_json("/api/verify-token").await
    }

    async fn user_status(&self) -> Result<UserStatus> {
        self.get_json("/api/user/status").await
    }
}

impl ActionPerformer for HostingGateway {
    async fn perform_action(
        &self,
        action: LifecycleAction,
        application: &Application,
    ) -> Result<ActionReceipt> {
        let path = format!("/api/app/{}", action.path_segment());
        let mut request = self
            .request(Method::POST, &path)
            .query(&[("id", application.id.as_str())]);
        if let Some(token) = self.storage.cookie(TOKEN_COOKIE) {
            request = request.bearer_auth(token);
        }
        let response = self
            .send(request)
            .await
            .with_context(|| format!("POST {path} failed for {}", application.id))?;
        let response = ensure_success(response, &path).await?;
        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

impl LogoutNotifier for HostingGateway {
    /// The request, cookies included, is built before returning: the caller
    /// expires those cookies right after.
    fn notify_logout(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, skipping logout notification");
            return;
        };
        let request = self.request(Method::POST, LOGOUT_PATH);
        runtime.spawn(async move {
            if let Err(error) = send_logout(request).await {
                debug!("logout notification failed: {error:#}");
            }
        });
    }
}
