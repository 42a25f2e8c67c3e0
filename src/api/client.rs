use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::models::RemoteSession;
use crate::settings::AgentSettings;
use crate::sync::SessionApi;

use super::ApiError;

/// Login material served by `GET /monitoring/agent/credentials`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    employee: Option<Employee>,
}

#[derive(Debug, Deserialize)]
struct Employee {
    #[serde(default)]
    name: Option<String>,
}

/// HTTP client for the monitoring backend.
///
/// Starts out authenticated with the bootstrap token only; `login` swaps in
/// an access token, and `reauthenticate` repeats the login with the cached
/// credentials when the access token expires.
pub struct ApiClient {
    pub(super) http: reqwest::Client,
    base_url: String,
    pub(super) upload_timeout: Duration,
    bootstrap_token: Option<String>,
    access_token: RwLock<Option<String>>,
    credentials: RwLock<Option<Credentials>>,
}

impl ApiClient {
    pub fn new(settings: &AgentSettings) -> Result<Self, ApiError> {
        Self::with_base_url(
            &settings.api_url,
            settings.request_timeout(),
            settings.upload_timeout(),
            settings.bootstrap_token.clone(),
        )
    }

    pub fn with_base_url(
        base_url: &str,
        request_timeout: Duration,
        upload_timeout: Duration,
        bootstrap_token: Option<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_timeout,
            bootstrap_token,
            access_token: RwLock::new(None),
            credentials: RwLock::new(None),
        })
    }

    pub(super) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn has_access_token(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.bootstrap_token
            .clone()
            .ok_or_else(|| ApiError::MissingCredentials("no access or bootstrap token".into()))
    }

    pub(super) async fn authorized(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self.bearer().await?;
        let response = request.bearer_auth(token).send().await?;
        check_status(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.authorized(self.http.get(self.url(path))).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch the agent's login credentials using the bootstrap token.
    pub async fn fetch_credentials(&self) -> Result<Credentials, ApiError> {
        let token = self.bootstrap_token.clone().ok_or_else(|| {
            ApiError::MissingCredentials("bootstrap token not configured".into())
        })?;
        let response = self
            .http
            .get(self.url("monitoring/agent/credentials"))
            .bearer_auth(token)
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let credentials: Credentials = serde_json::from_slice(&body)?;
        *self.credentials.write().await = Some(credentials.clone());
        Ok(credentials)
    }

    /// Log in with cached credentials, fetching them first if needed.
    pub async fn login(&self) -> Result<(), ApiError> {
        let cached = self.credentials.read().await.clone();
        let credentials = match cached {
            Some(credentials) => credentials,
            None => self.fetch_credentials().await?,
        };

        let response = self
            .http
            .post(self.url("auth/login"))
            .json(&json!({
                "email": credentials.email,
                "password": credentials.password,
            }))
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let login: LoginResponse = serde_json::from_slice(&body)?;

        *self.access_token.write().await = Some(login.access_token);
        let name = login
            .employee
            .and_then(|employee| employee.name)
            .unwrap_or_else(|| credentials.email.clone());
        info!("authenticated as {name}");
        Ok(())
    }
}

pub(super) fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::AuthExpired);
    }
    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }
    Ok(response)
}

/// Accepts `{"session": null}`, `{"session": {...}}` or a bare session object.
/// Sessions reported as inactive count as no session.
pub fn parse_current_session(payload: Value) -> Result<Option<RemoteSession>, ApiError> {
    let candidate = match payload {
        Value::Object(mut map) if map.contains_key("session") => {
            map.remove("session").unwrap_or(Value::Null)
        }
        other => other,
    };
    if candidate.is_null() {
        return Ok(None);
    }
    let session: RemoteSession = serde_json::from_value(candidate)?;
    Ok(session.is_active.then_some(session))
}

#[async_trait]
impl SessionApi for ApiClient {
    async fn current_session(&self) -> Result<Option<RemoteSession>, ApiError> {
        let payload: Value = self.get_json("monitoring/sessions/current").await?;
        parse_current_session(payload)
    }

    async fn active_rules(&self) -> Result<Vec<Value>, ApiError> {
        self.get_json("monitoring-config/active").await
    }

    async fn reauthenticate(&self) -> Result<(), ApiError> {
        *self.access_token.write().await = None;
        self.login().await
    }

    async fn stop_session(&self) -> Result<(), ApiError> {
        let request = self.http.post(self.url("monitoring/sessions/stop"));
        match self.authorized(request).await {
            Ok(_) => Ok(()),
            Err(ApiError::Status(404)) => {
                debug!("no active session to stop");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_session_means_idle() {
        assert_eq!(parse_current_session(json!({ "session": null })).unwrap(), None);
        assert_eq!(parse_current_session(Value::Null).unwrap(), None);
    }

    #[test]
    fn wrapped_and_bare_sessions_are_accepted() {
        let wrapped = parse_current_session(json!({
            "session": { "id": 12, "is_active": true, "screenshot_interval": 7 }
        }))
        .unwrap()
        .unwrap();
        assert_eq!(wrapped.id, "12");
        assert_eq!(wrapped.screenshot_interval, Some(7));

        let bare = parse_current_session(json!({ "id": "abc", "is_active": true }))
            .unwrap()
            .unwrap();
        assert_eq!(bare.id, "abc");
    }

    #[test]
    fn inactive_session_is_treated_as_none() {
        let parsed = parse_current_session(json!({
            "session": { "id": 3, "is_active": false }
        }))
        .unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn malformed_session_is_a_decode_error() {
        let err = parse_current_session(json!({ "session": { "is_active": true } })).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            email: "agent@example.com".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }

    #[test]
    fn url_joins_without_double_slashes() {
        let client = ApiClient::with_base_url(
            "http://localhost:5000/api/",
            Duration::from_secs(1),
            Duration::from_secs(1),
            None,
        )
        .unwrap();
        assert_eq!(
            client.url("/monitoring/sessions/current"),
            "http://localhost:5000/api/monitoring/sessions/current"
        );
    }
}
