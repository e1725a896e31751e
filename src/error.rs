use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "authorization:",
    "sessionid=",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the display surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    AuthExpired,

    // ── Network / backend ─────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Backend rejected request ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    // ── Flow / upload ─────────────────────────────────────────────────────────
    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("File {name} exceeds the size limit ({size_bytes} bytes)")]
    FileTooLarge { name: String, size_bytes: u64 },

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "You need to log in to continue.".into(),
                action: Some("Log in".into()),
            },

            AppError::AuthExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "Your session has expired.".into(),
                action: Some("Log in again".into()),
            },

            // ── Network / backend ─────────────────────────────────────────────
            AppError::Connectivity(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the registration portal. Please check your internet connection.".into(),
                action: Some("Check network and retry".into()),
            },

            AppError::BackendRejected { status, message } => ErrorPresentation {
                title: "Portal Error".into(),
                message: sanitize_message(
                    message,
                    &format!("The portal rejected the request (HTTP {}).", status),
                ),
                action: None,
            },

            // ── Flow / upload ─────────────────────────────────────────────────
            AppError::PreconditionUnmet(msg) => ErrorPresentation {
                title: "Missing Information".into(),
                message: sanitize_message(msg, "A required value is missing."),
                action: Some("Provide the missing value and retry".into()),
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            AppError::FileTooLarge { name, .. } => ErrorPresentation {
                title: "File Too Large".into(),
                message: format!("{} exceeds the 10 MB upload limit.", name),
                action: Some("Choose a smaller file".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
