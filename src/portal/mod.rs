//! Credential login against the portal backend.
//!
//! The sibling to the headful flow in [`crate::workflow`]: the operator
//! types portal credentials and solves a captcha locally instead of logging
//! in through the backend-driven browser.

pub mod captcha;
pub mod login;

pub use captcha::{CaptchaWidget, CAPTCHA_LOAD_TIMEOUT};
pub use login::{InitState, LoginOutcome, LoginRequest, PortalAuth};
