use std::sync::{Arc, RwLock};

use url::Url;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::fingerprint::{self, DeviceFingerprint};
use crate::settings::{CachedSetting, SettingValue};
use crate::transport::{
    AuthTransport, LoginRequest, LoginResponse, RefreshResponse, RegisterRequest,
    SettingsTransport, UserProfile,
};
use crate::types::SectionPath;

/// Typed wrapper over the Opsboard backend HTTP API.
///
/// Carries a cookie store so the http-only refresh cookie set at login
/// travels back on refresh calls without the client ever reading it. Bind a
/// [`CredentialStore`] with [`ApiClient::bind_credentials`] and the current
/// access token is attached as a bearer header to every authenticated
/// endpoint.
pub struct ApiClient {
    config: Config,
    http: reqwest::Client,
    credentials: RwLock<Option<Arc<CredentialStore>>>,
}

impl ApiClient {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            config,
            http,
            credentials: RwLock::new(None),
        })
    }

    /// Use a custom HTTP client (connection pool reuse, testing). The
    /// provided client should have a cookie store, or refresh calls will
    /// lose the refresh cookie.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Attach the credential store whose access token authenticates
    /// profile and settings calls.
    pub fn bind_credentials(&self, credentials: Arc<CredentialStore>) {
        if let Ok(mut slot) = self.credentials.write() {
            *slot = Some(credentials);
        }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] with the backend's explanation (taken
    /// username, weak password, ...), or [`Error::Network`] when the
    /// backend is unreachable.
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, Error> {
        let response = self
            .http
            .post(self.endpoint(&["auth", "register"])?)
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response, "register").await?;
        response.json().await.map_err(Into::into)
    }

    /// Current account profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] without a valid session, or the usual
    /// transport failures.
    pub async fn profile(&self) -> Result<UserProfile, Error> {
        let request = self.with_bearer(self.http.get(self.endpoint(&["account", "profile"])?));
        let response = Self::ensure_success(request.send().await?, "profile").await?;
        response.json().await.map_err(Into::into)
    }

    /// Update the account profile; returns it as the backend stored it.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ApiClient::profile`], plus [`Error::Api`]
    /// for rejected field values.
    pub async fn update_profile(&self, profile: &UserProfile) -> Result<UserProfile, Error> {
        let request = self
            .with_bearer(self.http.put(self.endpoint(&["account", "profile"])?))
            .json(profile);
        let response = Self::ensure_success(request.send().await?, "update profile").await?;
        response.json().await.map_err(Into::into)
    }

    fn with_bearer(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .credentials
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(|c| c.access_token()));
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config("base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Checks the response status; returns the response on success or the
    /// classified error for the scheduler and UI to branch on.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Auth { operation });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { operation });
        }
        if status.is_server_error() {
            return Err(Error::Server {
                operation,
                status: status.as_u16(),
            });
        }
        let detail = response.text().await.unwrap_or_default();
        Err(Error::Api {
            operation,
            status: status.as_u16(),
            detail,
        })
    }
}

impl AuthTransport for ApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, Error> {
        let response = self
            .http
            .post(self.endpoint(&["auth", "login"])?)
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response, "login").await?;
        response.json().await.map_err(Into::into)
    }

    async fn refresh(&self, fingerprint: &DeviceFingerprint) -> Result<RefreshResponse, Error> {
        let digest = fingerprint::hash(fingerprint);
        let body = serde_json::json!({
            "deviceFingerprint": fingerprint,
            "fingerprintHash": digest.hash,
            "shortHash": digest.short_hash,
        });
        let response = self
            .http
            .post(self.endpoint(&["auth", "refresh"])?)
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response, "refresh").await?;
        response.json().await.map_err(Into::into)
    }

    async fn logout(&self) -> Result<(), Error> {
        let request = self.with_bearer(self.http.post(self.endpoint(&["auth", "logout"])?));
        Self::ensure_success(request.send().await?, "logout").await?;
        Ok(())
    }
}

impl SettingsTransport for ApiClient {
    async fn fetch_section(&self, section: &SectionPath) -> Result<Vec<CachedSetting>, Error> {
        let request = self.with_bearer(
            self.http
                .get(self.endpoint(&["settings", section.as_str()])?),
        );
        let response = Self::ensure_success(request.send().await?, "fetch settings").await?;
        response.json().await.map_err(Into::into)
    }

    async fn update_setting(
        &self,
        section: &SectionPath,
        name: &str,
        value: &SettingValue,
    ) -> Result<CachedSetting, Error> {
        let request = self
            .with_bearer(
                self.http
                    .post(self.endpoint(&["settings", section.as_str(), name])?),
            )
            .json(&serde_json::json!({ "value": value }));
        let response = Self::ensure_success(request.send().await?, "update setting").await?;
        response.json().await.map_err(Into::into)
    }
}
