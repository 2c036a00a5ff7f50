//! Transport seams between the session core and the Opsboard backend.
//!
//! [`ApiClient`](crate::client::ApiClient) is the production implementation
//! of both traits; tests substitute their own. The traits exist so the
//! scheduler and settings service never know about HTTP.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fingerprint::DeviceFingerprint;
use crate::settings::{CachedSetting, SettingValue};
use crate::types::{SectionPath, UserId};

/// Account profile returned by the login and profile endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Credentials for the login endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// New-account payload for the register endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Successful login response.
///
/// The refresh token is deliberately absent from the body: the backend sets
/// it as an http-only cookie on this response, and the client never sees it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserProfile,
}

/// Successful token refresh response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Authentication endpoints consumed by the session manager and the refresh
/// scheduler.
pub trait AuthTransport: Send + Sync + 'static {
    /// Exchange credentials for an access token (and the http-only refresh
    /// cookie the backend sets alongside it).
    fn login(
        &self,
        request: &LoginRequest,
    ) -> impl Future<Output = Result<LoginResponse, Error>> + Send;

    /// Renew the access token. The fingerprint rides along as a soft
    /// anti-replay signal; the refresh token itself travels via cookie.
    fn refresh(
        &self,
        fingerprint: &DeviceFingerprint,
    ) -> impl Future<Output = Result<RefreshResponse, Error>> + Send;

    /// Invalidate the backend session.
    fn logout(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Settings endpoints consumed by
/// [`SettingsService`](crate::settings::SettingsService).
pub trait SettingsTransport: Send + Sync + 'static {
    /// All settings of one section.
    fn fetch_section(
        &self,
        section: &SectionPath,
    ) -> impl Future<Output = Result<Vec<CachedSetting>, Error>> + Send;

    /// Write one setting value; returns the confirmed setting as the
    /// backend now sees it.
    fn update_setting(
        &self,
        section: &SectionPath,
        name: &str,
        value: &SettingValue,
    ) -> impl Future<Output = Result<CachedSetting, Error>> + Send;
}
