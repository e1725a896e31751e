//! Wire types and API surface for the headful login and registration
//! workflow endpoints.
//!
//! # Security
//!
//! - Session cookies and tokens are never logged
//! - Only HTTP method, path, and status codes are logged (via the gateway)

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::gateway::PortalGateway;

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

/// Response from starting a headful login session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFlowResponse {
    /// Backend identifier for the headful browser session.
    pub flow_id: String,
}

/// Status of a headful login session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatus {
    /// True once the operator has completed the external login.
    pub logged_in: bool,
    /// Portal session cookie, present once logged in.
    #[serde(default)]
    pub cookie: Option<String>,
}

/// Result of finishing a headful login session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResponse {
    /// Portal session usable for subsequent workflow calls.
    pub session_id: String,
    #[serde(default)]
    pub cookie: Option<String>,
}

/// Result of running the registration workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response from initializing a workflow for a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub workflow_id: String,
}

/// Request body for filling one section of a workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSectionRequest {
    pub workflow_id: String,
    pub section_code: String,
    pub field_values: serde_json::Value,
    pub action_name: String,
}

/// Response from filling a workflow section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSectionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RegistrationApi
// ─────────────────────────────────────────────────────────────────────────────

/// API operations the orchestrator depends on.
///
/// Kept as a trait so orchestration logic can be tested against fakes
/// without a network.
pub trait RegistrationApi: Send + Sync {
    /// Starts a headful login session on the backend.
    fn start_headful_login(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<StartFlowResponse, AppError>> + Send + '_>>;

    /// Polls the login status of a headful session.
    fn poll_status<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FlowStatus, AppError>> + Send + 'a>>;

    /// Finishes the headful session, exchanging it for a portal session.
    fn finish<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FinishResponse, AppError>> + Send + 'a>>;

    /// Runs the registration workflow for a contract.
    fn run_workflow<'a>(
        &'a self,
        session_id: &'a str,
        contract_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RunWorkflowResponse, AppError>> + Send + 'a>>;

    /// Initializes a workflow for an authenticated session.
    fn initialize<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<InitializeResponse, AppError>> + Send + 'a>>;

    /// Fills one section of an initialized workflow.
    fn fill_section(
        &self,
        req: FillSectionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FillSectionResponse, AppError>> + Send + '_>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpRegistrationApi
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP implementation of [`RegistrationApi`] over the portal gateway.
#[derive(Clone)]
pub struct HttpRegistrationApi {
    gateway: PortalGateway,
}

impl HttpRegistrationApi {
    pub fn new(gateway: PortalGateway) -> Self {
        Self { gateway }
    }

    async fn do_start(&self) -> Result<StartFlowResponse, AppError> {
        info!("[WORKFLOW] Starting headful login session");
        self.gateway
            .post_json("/api/dkkdauth/headful/start", json!({}))
            .await
    }

    async fn do_poll(&self, flow_id: &str) -> Result<FlowStatus, AppError> {
        self.gateway
            .get_json(&format!("/api/dkkdauth/headful/status/{}", flow_id))
            .await
    }

    async fn do_finish(&self, flow_id: &str) -> Result<FinishResponse, AppError> {
        info!("[WORKFLOW] Finishing headful login session");
        self.gateway
            .post_json("/api/dkkdauth/headful/finish", json!({ "flowId": flow_id }))
            .await
    }

    async fn do_run(
        &self,
        session_id: &str,
        contract_id: &str,
    ) -> Result<RunWorkflowResponse, AppError> {
        info!("[WORKFLOW] Running registration workflow");
        self.gateway
            .post_json(
                "/api/registration-workflow/run",
                json!({ "sessionId": session_id, "contractId": contract_id }),
            )
            .await
    }

    async fn do_initialize(&self, session_id: &str) -> Result<InitializeResponse, AppError> {
        self.gateway
            .post_json(
                "/api/registration-workflow/initialize",
                json!({ "sessionId": session_id }),
            )
            .await
    }

    async fn do_fill_section(
        &self,
        req: FillSectionRequest,
    ) -> Result<FillSectionResponse, AppError> {
        let body = serde_json::to_value(&req)
            .map_err(|e| AppError::Internal(format!("Failed to serialize section fill: {}", e)))?;
        self.gateway
            .post_json("/api/registration-workflow/section/fill", body)
            .await
    }
}

impl RegistrationApi for HttpRegistrationApi {
    fn start_headful_login(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<StartFlowResponse, AppError>> + Send + '_>> {
        Box::pin(self.do_start())
    }

    fn poll_status<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FlowStatus, AppError>> + Send + 'a>> {
        Box::pin(self.do_poll(flow_id))
    }

    fn finish<'a>(
        &'a self,
        flow_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<FinishResponse, AppError>> + Send + 'a>> {
        Box::pin(self.do_finish(flow_id))
    }

    fn run_workflow<'a>(
        &'a self,
        session_id: &'a str,
        contract_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RunWorkflowResponse, AppError>> + Send + 'a>> {
        Box::pin(self.do_run(session_id, contract_id))
    }

    fn initialize<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<InitializeResponse, AppError>> + Send + 'a>> {
        Box::pin(self.do_initialize(session_id))
    }

    fn fill_section(
        &self,
        req: FillSectionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FillSectionResponse, AppError>> + Send + '_>> {
        Box::pin(self.do_fill_section(req))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Credentials, TokenSource};
    use secrecy::SecretString;
    use std::sync::Arc;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NoRefresh;

    impl TokenSource for NoRefresh {
        fn refresh<'a>(
            &'a self,
            _user_id: &'a str,
            _refresh_token: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<SecretString, AppError>> + Send + 'a>> {
            Box::pin(async { Err(AppError::AuthExpired) })
        }
    }

    fn api_for(server: &MockServer) -> HttpRegistrationApi {
        let creds = Credentials {
            user_id: "u1".to_string(),
            access_token: SecretString::from("token".to_string()),
            refresh_token: None,
        };
        let gateway = PortalGateway::new(
            Url::parse(&server.uri()).unwrap(),
            creds,
            Arc::new(NoRefresh),
        )
        .unwrap();
        HttpRegistrationApi::new(gateway)
    }

    #[tokio::test]
    async fn start_returns_flow_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/dkkdauth/headful/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "flowId": "flow-123"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let response = api.start_headful_login().await.unwrap();

        assert_eq!(response.flow_id, "flow-123");
    }

    #[tokio::test]
    async fn poll_status_reads_logged_in_flag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/dkkdauth/headful/status/flow-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "loggedIn": false
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let status = api.poll_status("flow-123").await.unwrap();

        assert!(!status.logged_in);
        assert!(status.cookie.is_none());
    }

    #[tokio::test]
    async fn finish_posts_flow_id_and_returns_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/dkkdauth/headful/finish"))
            .and(body_string_contains("\"flowId\":\"flow-123\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionId": "sess-9",
                "cookie": "ASP.NET_SessionId=abc"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let response = api.finish("flow-123").await.unwrap();

        assert_eq!(response.session_id, "sess-9");
        assert_eq!(response.cookie.as_deref(), Some("ASP.NET_SessionId=abc"));
    }

    #[tokio::test]
    async fn run_workflow_sends_session_and_contract() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/registration-workflow/run"))
            .and(body_string_contains("\"sessionId\":\"sess-9\""))
            .and(body_string_contains("\"contractId\":\"contract-7\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let response = api.run_workflow("sess-9", "contract-7").await.unwrap();

        assert!(response.success);
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn run_workflow_surfaces_backend_error_field() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/registration-workflow/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "Portal session rejected"
            })))
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let response = api.run_workflow("sess-9", "contract-7").await.unwrap();

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Portal session rejected"));
    }

    #[tokio::test]
    async fn fill_section_serializes_camel_case() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/registration-workflow/section/fill"))
            .and(body_string_contains("\"workflowId\":\"wf-1\""))
            .and(body_string_contains("\"sectionCode\":\"LOGIN_STEP\""))
            .and(body_string_contains("\"actionName\":\"submit\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let response = api
            .fill_section(FillSectionRequest {
                workflow_id: "wf-1".to_string(),
                section_code: "LOGIN_STEP".to_string(),
                field_values: serde_json::json!({ "username": "acme" }),
                action_name: "submit".to_string(),
            })
            .await
            .unwrap();

        assert!(response.success);
    }

    #[tokio::test]
    async fn backend_failure_maps_to_backend_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/dkkdauth/headful/start"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let api = api_for(&mock_server);

        let result = api.start_headful_login().await;

        match result {
            Err(AppError::BackendRejected { status, .. }) => assert_eq!(status, 503),
            other => panic!("Expected BackendRejected, got: {:?}", other),
        }
    }
}
