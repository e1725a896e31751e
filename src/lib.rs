//! Client engine for a business-registration portal front-end.
//!
//! Two cores, both driven by a host UI:
//!
//! - [`workflow`] - the external-login automation flow: start a backend
//!   browser session, poll until the operator logs in on the government
//!   portal, finish the session exactly once, run the registration workflow.
//! - [`upload`] - the contract-template upload queue: size-capped items,
//!   at most three concurrent transfers, per-item progress and cancel.
//!
//! Both sit on [`gateway`], which attaches the bearer credential to every
//! request and transparently refreshes it once on 401.

pub mod error;
pub mod gateway;
pub mod portal;
pub mod upload;
pub mod workflow;

pub use error::{AppError, ErrorPresentation};
pub use gateway::{Credentials, HttpTokenSource, LoggingMode, PortalGateway, TokenSource};
pub use upload::queue::{UploadItem, UploadQueue, UploadStatus, MAX_FILE_SIZE};
pub use upload::scheduler::{UploadScheduler, MAX_PARALLEL_UPLOADS};
pub use upload::transport::{FilePayload, HttpUploadTransport, UploadTransport};
pub use workflow::{AutomationConfig, AutomationOrchestrator, FlowEvent, FlowPhase};
pub use workflow::api::{HttpRegistrationApi, RegistrationApi};
