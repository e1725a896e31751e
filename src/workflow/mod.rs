//! External login and registration automation.
//!
//! The backend drives a headful browser session against the government
//! portal; this module starts that session, polls it until the operator has
//! logged in, finishes it into a portal session, and hands the session to
//! the registration workflow.

pub mod api;
pub mod orchestrator;

pub use api::{HttpRegistrationApi, RegistrationApi};
pub use orchestrator::{AutomationConfig, AutomationOrchestrator, FlowEvent, FlowPhase};
