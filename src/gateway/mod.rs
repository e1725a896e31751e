//! Authenticated HTTP gateway for the registration-portal backend.
//!
//! All portal traffic flows through [`PortalGateway`], which:
//!
//! - attaches the bearer credential to every request
//! - on `401`, performs exactly one token refresh and retries the original
//!   request once before surfacing [`crate::error::AppError::AuthExpired`]
//! - logs method, sanitized path, status, and duration, and never headers,
//!   bodies, or tokens

pub mod client;
pub mod refresh;

pub use client::{Credentials, LoggingMode, PortalGateway};
pub use refresh::{HttpTokenSource, TokenSource};
