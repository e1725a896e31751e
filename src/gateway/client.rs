//! Portal HTTP gateway with secure credential handling and safe logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::gateway::refresh::TokenSource;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all portal API requests.
const CLIENT_USER_AGENT: &str = "RegFlow/0.1.0";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "code",
    "token",
    "sid",
    "session",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/api/registration-workflow/run`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/api/dkkdauth/session?token=***&lang=vi`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Portal credentials for API access.
///
/// Sensitive fields (`access_token`, `refresh_token`) are wrapped in `SecretString`
/// to prevent accidental exposure through `Debug` traits or logging.
#[derive(Clone)]
pub struct Credentials {
    /// Backend user ID, used as the refresh-request subject.
    pub user_id: String,
    /// Bearer access token (wrapped for security)
    pub access_token: SecretString,
    /// Refresh token (wrapped for security, absent before login)
    pub refresh_token: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Credentials {
    /// Creates placeholder credentials for startup before authentication.
    pub fn placeholder() -> Self {
        Self {
            user_id: String::new(),
            access_token: SecretString::from(String::new()),
            refresh_token: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// # Security
///
/// This function uses the `url` crate for proper URL parsing rather than
/// regex-based string manipulation, ensuring robust handling of edge cases.
///
/// # Returns
///
/// A string safe for logging that never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PortalGateway
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe HTTP gateway for portal API interactions.
///
/// # Thread Safety
///
/// - `creds`: Protected by `RwLock` allowing concurrent reads (requests)
///   but exclusive writes (credential refresh).
/// - `refresh_lock`: `Mutex` to serialize refresh attempts and prevent
///   thundering herd during token expiration.
#[derive(Clone)]
pub struct PortalGateway {
    /// The underlying HTTP client.
    http: reqwest::Client,
    /// Base URL of the portal backend.
    base_url: Url,
    /// Thread-safe credentials storage.
    creds: Arc<RwLock<Credentials>>,
    /// Lock to serialize refresh token operations.
    refresh_lock: Arc<Mutex<()>>,
    /// Supplies fresh access tokens on 401.
    token_source: Arc<dyn TokenSource>,
    /// Controls URL sanitization for logging.
    logging_mode: LoggingMode,
}

impl PortalGateway {
    /// Creates a new gateway with the provided credentials and token source.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(
        base_url: Url,
        creds: Credentials,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<Self, AppError> {
        let http = build_http_client()?;
        Ok(Self {
            http,
            base_url,
            creds: Arc::new(RwLock::new(creds)),
            refresh_lock: Arc::new(Mutex::new(())),
            token_source,
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Updates the stored credentials (e.g., after login or token refresh).
    pub async fn update_credentials(&self, creds: Credentials) {
        let mut guard = self.creds.write().await;
        *guard = creds;
    }

    /// Returns a reference to the underlying HTTP client.
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exposes the current bearer token for callers that must build their
    /// own request (streaming multipart bodies cannot go through `request`
    /// because they are not clonable for the retry).
    pub(crate) async fn bearer_token(&self) -> String {
        let creds = self.creds.read().await;
        creds.access_token.expose_secret().to_string()
    }

    /// Builds a full URL by joining the path with the base URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the path cannot be joined.
    pub fn join_url(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Executes an authenticated request with automatic token refresh.
    ///
    /// This is the primary method for making authenticated portal API calls.
    /// It handles:
    /// - Automatically attaching the Authorization header
    /// - Detecting 401 responses and refreshing the token exactly once
    /// - Retrying the request once after refresh
    /// - Thread-safe refresh with double-checked locking
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method (GET, POST, etc.)
    /// * `path` - The API path (e.g., "/api/registration-workflow/run")
    /// * `body` - Optional JSON body (kept as a value for clonability)
    ///
    /// # Errors
    ///
    /// - `AppError::AuthExpired` - Refresh failed or the retry was also rejected
    /// - `AppError::Connectivity` - Network error
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, AppError> {
        let url = self.join_url(path)?;

        // Attempt 1: Try with current credentials
        let original_token = {
            let creds = self.creds.read().await;
            creds.access_token.expose_secret().to_string()
        };

        let response = self
            .execute_authed_request(method.clone(), url.clone(), body.as_ref(), &original_token)
            .await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!("[GATEWAY] Received 401, attempting token refresh...");

        // Refresh logic with double-checked locking
        {
            let _refresh_guard = self.refresh_lock.lock().await;

            // Double-check: another task may have already refreshed
            let current_token = {
                let creds = self.creds.read().await;
                creds.access_token.expose_secret().to_string()
            };

            if current_token != original_token {
                info!("[GATEWAY] Token already refreshed by another task");
            } else {
                self.do_token_refresh().await?;
            }
        }

        // Attempt 2: Retry once with new credentials
        let new_token = {
            let creds = self.creds.read().await;
            creds.access_token.expose_secret().to_string()
        };

        let retry_response = self
            .execute_authed_request(method, url, body.as_ref(), &new_token)
            .await?;

        // If still 401 after refresh, session is truly expired
        if retry_response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("[GATEWAY] Still unauthorized after token refresh");
            return Err(AppError::AuthExpired);
        }

        Ok(retry_response)
    }

    /// Executes an authenticated GET and deserializes a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let response = self.request(Method::GET, path, None).await?;
        Self::read_json(response).await
    }

    /// Executes an authenticated POST with a JSON body and deserializes a
    /// JSON response.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AppError> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        Self::read_json(response).await
    }

    /// Executes an authenticated DELETE, discarding the response body.
    pub async fn delete(&self, path: &str) -> Result<(), AppError> {
        let response = self.request(Method::DELETE, path, None).await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Checks the status and deserializes the response body.
    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AppError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|_| AppError::Internal("Invalid response from portal".to_string()))
    }

    /// Maps a non-2xx response to `AppError::BackendRejected`, extracting
    /// a human-readable message from the body when one is present.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = extract_error_message(response).await
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));

        Err(AppError::BackendRejected {
            status: status.as_u16(),
            message,
        })
    }

    /// Executes a single authenticated request (no retry logic).
    async fn execute_authed_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        access_token: &str,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self.http.request(method.clone(), url.as_str());
        request = request.bearer_auth(access_token);

        if let Some(json_body) = body {
            request = request.json(json_body);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();

                info!(
                    "[GATEWAY] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    status.as_u16(),
                    duration_ms
                );

                Ok(response)
            }
            Err(_) => {
                // Never log the raw reqwest error, it may contain the full URL
                info!(
                    "[GATEWAY] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                Err(AppError::Connectivity(
                    "Connection to registration portal failed".to_string(),
                ))
            }
        }
    }

    /// Performs the actual token refresh operation.
    async fn do_token_refresh(&self) -> Result<(), AppError> {
        let (user_id, refresh_token) = {
            let creds = self.creds.read().await;
            let refresh_token = creds
                .refresh_token
                .as_ref()
                .cloned()
                .ok_or(AppError::AuthExpired)?;
            (creds.user_id.clone(), refresh_token)
        };

        let new_access_token = self.token_source.refresh(&user_id, &refresh_token).await?;

        {
            let mut creds = self.creds.write().await;
            creds.access_token = new_access_token;
        }

        info!("[GATEWAY] Token refresh complete, credentials updated");
        Ok(())
    }
}

/// Extracts a message from an error response body.
///
/// The portal returns either `{"message": "..."}` or `{"error": "..."}`
/// depending on the endpoint; plain-text bodies are passed through.
async fn extract_error_message(response: reqwest::Response) -> Option<String> {
    let text = response.text().await.ok()?;
    if text.trim().is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(msg) = value.get("message").and_then(|v| v.as_str()) {
            return Some(msg.to_string());
        }
        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            return Some(msg.to_string());
        }
    }

    Some(text)
}

/// Builds the configured HTTP client.
pub(crate) fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ─────────────────────────────────────────────────────────────────────────
    // URL Sanitization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sanitize_strips_scheme_and_host() {
        let url = Url::parse("https://portal.example.com/api/registration-workflow/run").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/api/registration-workflow/run");
        assert!(!result.contains("https"));
        assert!(!result.contains("portal.example.com"));
    }

    #[test]
    fn sanitize_strips_fragment() {
        let url = Url::parse("https://example.com/path?safe=value#secret-anchor").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);
        assert!(!result.contains('#'));
        assert_eq!(result, "/path");

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);
        assert!(!result.contains("secret-anchor"));
        assert!(result.contains("safe=value"));
    }

    #[test]
    fn path_only_excludes_query_string() {
        let url =
            Url::parse("https://portal.example.com/api/auth/refresh?token=secret&lang=vi").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/api/auth/refresh");
        assert!(!result.contains('?'));
        assert!(!result.contains("secret"));
    }

    #[test]
    fn path_and_query_redacted_redacts_sensitive_keys() {
        let test_cases = [
            ("access_token", "abc123"),
            ("Access_Token", "xyz789"),
            ("refresh_token", "refresh123"),
            ("code", "authcode789"),
            ("token", "sometoken"),
            ("sid", "sessionid123"),
            ("session", "sess456"),
            ("authorization", "bearer123"),
        ];

        for (key, value) in test_cases {
            let url_str = format!("https://example.com/path?{}={}", key, value);
            let url = Url::parse(&url_str).unwrap();

            let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

            assert!(
                result.contains(&format!("{}=***", key)),
                "Expected '{}=***' in result '{}'",
                key,
                result
            );
            assert!(
                !result.contains(value),
                "Value '{}' should be redacted in result '{}'",
                value,
                result
            );
        }
    }

    #[test]
    fn path_and_query_redacted_preserves_safe_keys() {
        let url = Url::parse(
            "https://portal.example.com/api/dkkdauth/session?token=secret123&lang=vi&page=2",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.contains("lang=vi"));
        assert!(result.contains("page=2"));
        assert!(result.contains("token=***"));
        assert!(!result.contains("secret123"));
    }

    #[test]
    fn sanitize_handles_empty_query_string() {
        let url = Url::parse("https://example.com/path").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert_eq!(result, "/path");
    }

    #[test]
    fn is_sensitive_param_requires_exact_match() {
        assert!(!is_sensitive_param("access_token_id"));
        assert!(!is_sensitive_param("my_access_token"));
        assert!(!is_sensitive_param("tokens"));
        assert!(is_sensitive_param("ACCESS_TOKEN"));
        assert!(is_sensitive_param("Token"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn credentials_debug_redacts_tokens() {
        let creds = Credentials {
            user_id: "user-1234".to_string(),
            access_token: SecretString::from("super_secret_token_12345".to_string()),
            refresh_token: Some(SecretString::from("super_secret_refresh_67890".to_string())),
        };

        let debug_output = format!("{:?}", creds);

        assert!(debug_output.contains("user-1234"));
        assert!(!debug_output.contains("super_secret_token_12345"));
        assert!(!debug_output.contains("super_secret_refresh_67890"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn credentials_placeholder_has_empty_values() {
        let creds = Credentials::placeholder();

        assert!(creds.user_id.is_empty());
        assert!(creds.refresh_token.is_none());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gateway Tests
    // ─────────────────────────────────────────────────────────────────────────

    /// `TokenSource` returning a fixed token, counting calls.
    struct FixedTokenSource {
        token: String,
        calls: AtomicUsize,
    }

    impl FixedTokenSource {
        fn new(token: &str) -> Self {
            Self {
                token: token.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TokenSource for FixedTokenSource {
        fn refresh<'a>(
            &'a self,
            _user_id: &'a str,
            _refresh_token: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<SecretString, AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(SecretString::from(self.token.clone()))
            })
        }
    }

    /// `TokenSource` that always fails as expired.
    struct ExpiredTokenSource;

    impl TokenSource for ExpiredTokenSource {
        fn refresh<'a>(
            &'a self,
            _user_id: &'a str,
            _refresh_token: &'a SecretString,
        ) -> Pin<Box<dyn Future<Output = Result<SecretString, AppError>> + Send + 'a>> {
            Box::pin(async { Err(AppError::AuthExpired) })
        }
    }

    fn test_creds() -> Credentials {
        Credentials {
            user_id: "user-1".to_string(),
            access_token: SecretString::from("stale_token".to_string()),
            refresh_token: Some(SecretString::from("refresh_1".to_string())),
        }
    }

    fn gateway_for(server: &MockServer, token_source: Arc<dyn TokenSource>) -> PortalGateway {
        PortalGateway::new(Url::parse(&server.uri()).unwrap(), test_creds(), token_source).unwrap()
    }

    #[tokio::test]
    async fn request_attaches_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .and(bearer_token("stale_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server, Arc::new(FixedTokenSource::new("unused")));

        let response = gateway.request(Method::GET, "/api/ping", None).await.unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn request_refreshes_once_and_retries_on_401() {
        let mock_server = MockServer::start().await;

        // Stale token gets 401, fresh token gets 200
        Mock::given(method("POST"))
            .and(path("/api/registration-workflow/run"))
            .and(bearer_token("stale_token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/registration-workflow/run"))
            .and(bearer_token("fresh_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = Arc::new(FixedTokenSource::new("fresh_token"));
        let gateway = gateway_for(&mock_server, source.clone());

        let response = gateway
            .request(
                Method::POST,
                "/api/registration-workflow/run",
                Some(serde_json::json!({"sessionId": "s1"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_gives_up_after_second_401() {
        let mock_server = MockServer::start().await;

        // 401 for any token: exactly two attempts, then AuthExpired
        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server, Arc::new(FixedTokenSource::new("fresh_token")));

        let result = gateway.request(Method::GET, "/api/ping", None).await;

        assert!(matches!(result, Err(AppError::AuthExpired)));
    }

    #[tokio::test]
    async fn request_without_refresh_token_fails_as_expired() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let creds = Credentials {
            user_id: "user-1".to_string(),
            access_token: SecretString::from("stale_token".to_string()),
            refresh_token: None,
        };
        let gateway = PortalGateway::new(
            Url::parse(&mock_server.uri()).unwrap(),
            creds,
            Arc::new(FixedTokenSource::new("unused")),
        )
        .unwrap();

        let result = gateway.request(Method::GET, "/api/ping", None).await;

        assert!(matches!(result, Err(AppError::AuthExpired)));
    }

    #[tokio::test]
    async fn request_propagates_refresh_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server, Arc::new(ExpiredTokenSource));

        let result = gateway.request(Method::GET, "/api/ping", None).await;

        assert!(matches!(result, Err(AppError::AuthExpired)));
    }

    #[tokio::test]
    async fn get_json_parses_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "x"
            })))
            .mount(&mock_server)
            .await;

        #[derive(serde::Deserialize)]
        struct Thing {
            name: String,
        }

        let gateway = gateway_for(&mock_server, Arc::new(FixedTokenSource::new("unused")));

        let thing: Thing = gateway.get_json("/api/thing").await.unwrap();

        assert_eq!(thing.name, "x");
    }

    #[tokio::test]
    async fn non_success_status_maps_to_backend_rejected_with_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/thing"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Contract not found"
            })))
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server, Arc::new(FixedTokenSource::new("unused")));

        let result: Result<serde_json::Value, AppError> = gateway.get_json("/api/thing").await;

        match result {
            Err(AppError::BackendRejected { status, message }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "Contract not found");
            }
            other => panic!("Expected BackendRejected, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_body_with_error_field_is_extracted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/api/thing"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "error": "File is in use"
            })))
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server, Arc::new(FixedTokenSource::new("unused")));

        let result = gateway.delete("/api/thing").await;

        match result {
            Err(AppError::BackendRejected { status, message }) => {
                assert_eq!(status, 409);
                assert_eq!(message, "File is in use");
            }
            other => panic!("Expected BackendRejected, got: {:?}", other),
        }
    }

    #[test]
    fn join_url_constructs_correct_url() {
        let gateway = PortalGateway::new(
            Url::parse("https://portal.example.com").unwrap(),
            Credentials::placeholder(),
            Arc::new(ExpiredTokenSource),
        )
        .unwrap();

        let url = gateway.join_url("/api/dkkdauth/headful/start").unwrap();

        assert_eq!(
            url.as_str(),
            "https://portal.example.com/api/dkkdauth/headful/start"
        );
    }

    #[test]
    fn build_http_client_succeeds() {
        assert!(build_http_client().is_ok());
    }
}
