//! Access-token refresh against the backend auth endpoint.
//!
//! Exchanges a long-lived refresh token for a fresh access token without
//! user interaction. The gateway calls this exactly once per observed `401`.

use std::future::Future;
use std::pin::Pin;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use url::Url;

use crate::error::AppError;

/// Path of the refresh endpoint, relative to the portal base URL.
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Response from the token refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// Supplies fresh access tokens to the gateway.
///
/// Injected so the refresh transport can be faked in tests and so the
/// gateway never owns credential-rotation policy itself.
pub trait TokenSource: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    fn refresh<'a>(
        &'a self,
        user_id: &'a str,
        refresh_token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<SecretString, AppError>> + Send + 'a>>;
}

/// `TokenSource` backed by the portal's `/api/auth/refresh` endpoint.
pub struct HttpTokenSource {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTokenSource {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Performs the refresh call.
    ///
    /// # Errors
    ///
    /// - `AppError::AuthExpired` - the refresh token is invalid or expired
    /// - `AppError::Connectivity` - network error during refresh
    ///
    /// # Security
    ///
    /// Never logs the refresh token or the new access token.
    async fn refresh_access_token(
        &self,
        user_id: &str,
        refresh_token: &SecretString,
    ) -> Result<SecretString, AppError> {
        let url = self
            .base_url
            .join(REFRESH_PATH)
            .map_err(|_| AppError::Internal("Invalid refresh URL".to_string()))?;

        info!("[GATEWAY] Refreshing access token...");

        let body = json!({
            "userId": user_id,
            "refreshToken": refresh_token.expose_secret(),
        });

        let response = self.http.post(url).json(&body).send().await.map_err(|_| {
            error!("[GATEWAY] Token refresh request failed");
            AppError::Connectivity("Failed to connect for token refresh".to_string())
        })?;

        let status = response.status();

        if status.is_success() {
            let parsed: RefreshResponse = response.json().await.map_err(|_| {
                error!("[GATEWAY] Failed to parse token refresh response");
                AppError::Internal("Invalid token refresh response".to_string())
            })?;

            info!("[GATEWAY] Token refresh successful");
            Ok(SecretString::from(parsed.access_token))
        } else if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            // Refresh token is invalid or expired
            error!("[GATEWAY] Token refresh failed: {}", status);
            Err(AppError::AuthExpired)
        } else {
            error!("[GATEWAY] Token refresh failed with status: {}", status);
            Err(AppError::BackendRejected {
                status: status.as_u16(),
                message: "Token refresh failed".to_string(),
            })
        }
    }
}

impl TokenSource for HttpTokenSource {
    fn refresh<'a>(
        &'a self,
        user_id: &'a str,
        refresh_token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<SecretString, AppError>> + Send + 'a>> {
        Box::pin(self.refresh_access_token(user_id, refresh_token))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
