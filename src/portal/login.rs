//! Credential login flow against the portal backend.
//!
//! Four calls mirror the portal's own login page: initialize (fetch the
//! page state and captcha site key), login, logout, and session validation.
//! After a successful login the credentials are cross-checked against the
//! government portal by initializing a workflow and filling its login
//! section.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::gateway::PortalGateway;
use crate::workflow::api::{FillSectionRequest, RegistrationApi};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Section code of the portal login step in the registration workflow.
const LOGIN_SECTION_CODE: &str = "LOGIN_STEP";

/// Action submitted when filling the login section.
const LOGIN_ACTION: &str = "submit";

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Portal login page state fetched before rendering the form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitState {
    pub view_state: String,
    pub event_validation: String,
    #[serde(default)]
    pub recaptcha_site_key: Option<String>,
    #[serde(default)]
    pub session_cookie: Option<String>,
    /// False when the portal serves its legacy image captcha instead.
    #[serde(default)]
    pub use_recaptcha: bool,
}

/// Credential login request.
pub struct LoginRequest {
    pub username: String,
    pub password: SecretString,
    pub recaptcha_token: Option<String>,
    pub session_id: String,
}

/// Outcome of a credential login attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Portal auth token, present on success.
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionValidity {
    is_valid: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// PortalAuth
// ─────────────────────────────────────────────────────────────────────────────

/// Credential login operations over the gateway.
#[derive(Clone)]
pub struct PortalAuth {
    gateway: PortalGateway,
}

impl PortalAuth {
    pub fn new(gateway: PortalGateway) -> Self {
        Self { gateway }
    }

    /// Fetches the portal login page state and captcha configuration.
    pub async fn init_login(&self) -> Result<InitState, AppError> {
        info!("[AUTH] Initializing portal login");
        self.gateway.get_json("/api/dkkdauth/initialize").await
    }

    /// Submits portal credentials.
    ///
    /// # Security
    ///
    /// The password leaves the `SecretString` wrapper only at the moment the
    /// request body is built; it is never logged.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome, AppError> {
        info!("[AUTH] Submitting portal login");
        let body = json!({
            "username": req.username,
            "password": req.password.expose_secret(),
            "recaptchaToken": req.recaptcha_token,
            "sessionId": req.session_id,
        });

        let outcome: LoginOutcome = self.gateway.post_json("/api/dkkdauth/login", body).await?;

        if outcome.success {
            info!("[AUTH] Portal login succeeded");
        } else {
            warn!("[AUTH] Portal login rejected");
        }

        Ok(outcome)
    }

    /// Ends the portal session.
    pub async fn logout(&self, session_id: &str) -> Result<(), AppError> {
        info!("[AUTH] Logging out of portal session");
        let _: serde_json::Value = self
            .gateway
            .post_json("/api/dkkdauth/logout", json!({ "sessionId": session_id }))
            .await?;
        Ok(())
    }

    /// Checks whether a portal session is still valid.
    ///
    /// A rejected answer from the backend means "not valid", not an error;
    /// only connectivity failures propagate.
    pub async fn validate_session(&self, session_id: &str) -> Result<bool, AppError> {
        let result: Result<SessionValidity, AppError> = self
            .gateway
            .get_json(&format!("/api/dkkdauth/session/{}", session_id))
            .await;

        match result {
            Ok(validity) => Ok(validity.is_valid),
            Err(AppError::BackendRejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cross-checks freshly accepted credentials against the government
    /// portal: initialize a workflow for the session and fill its login
    /// section. A rejected fill means the portal itself refused the
    /// credentials even though the backend accepted them.
    pub async fn verify_credentials(
        &self,
        api: &Arc<dyn RegistrationApi>,
        session_id: &str,
        username: &str,
        password: &SecretString,
    ) -> Result<bool, AppError> {
        let initialized = api.initialize(session_id).await?;

        let fill = api
            .fill_section(FillSectionRequest {
                workflow_id: initialized.workflow_id,
                section_code: LOGIN_SECTION_CODE.to_string(),
                field_values: json!({
                    "username": username,
                    "password": password.expose_secret(),
                }),
                action_name: LOGIN_ACTION.to_string(),
            })
            .await?;

        if !fill.success {
            warn!("[AUTH] Portal refused the verified credentials");
        }

        Ok(fill.success)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
