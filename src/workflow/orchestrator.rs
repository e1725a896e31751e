//! External-login automation orchestrator.
//!
//! Drives one headful login flow end to end: start the backend browser
//! session, poll it until the operator has logged in on the external portal,
//! finish the session exactly once, then run the registration workflow for
//! the selected contract.
//!
//! # Concurrency
//!
//! One tokio poll task per flow, bound to a `CancellationToken` that is
//! cancelled on every exit path (drop guard). Finish deduplication is a
//! phase guard under the state lock: only `AwaitingExternalLogin` may move
//! to `Finishing`, so overlapping success observations settle the flow once.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::workflow::api::RegistrationApi;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between login status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Capacity of the flow event channel.
const DEFAULT_EVENT_CAPACITY: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of an automation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowPhase {
    /// No flow in progress.
    Idle,
    /// Backend browser session is being created.
    Starting,
    /// Waiting for the operator to log in on the external portal.
    AwaitingExternalLogin,
    /// Exchanging the headful session for a portal session.
    Finishing,
    /// Registration workflow is running.
    RunningWorkflow,
    /// Workflow finished successfully.
    Completed,
    /// Flow ended with an error.
    Failed,
}

impl FlowPhase {
    /// True for phases from which no further transition happens.
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowPhase::Completed | FlowPhase::Failed)
    }
}

/// One entry in the append-only flow log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowLogEntry {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub message: String,
}

/// Event emitted on every phase transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEvent {
    pub phase: FlowPhase,
    pub message: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Interval between login status polls.
    pub poll_interval: Duration,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal State
// ─────────────────────────────────────────────────────────────────────────────

struct FlowState {
    phase: FlowPhase,
    flow_id: Option<String>,
    contract_id: Option<String>,
    session_id: Option<String>,
    last_error: Option<String>,
    log: Vec<FlowLogEntry>,
}

impl FlowState {
    fn new() -> Self {
        Self {
            phase: FlowPhase::Idle,
            flow_id: None,
            contract_id: None,
            session_id: None,
            last_error: None,
            log: Vec::new(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// AutomationOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one external-login automation flow at a time.
pub struct AutomationOrchestrator {
    api: Arc<dyn RegistrationApi>,
    config: AutomationConfig,
    state: Mutex<FlowState>,
    events: broadcast::Sender<FlowEvent>,
    /// Cancellation token of the running poll task, if any.
    cancel: Mutex<Option<CancellationToken>>,
}

impl AutomationOrchestrator {
    pub fn new(api: Arc<dyn RegistrationApi>, config: AutomationConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            api,
            config,
            state: Mutex::new(FlowState::new()),
            events,
            cancel: Mutex::new(None),
        })
    }

    /// Current phase of the flow.
    pub async fn phase(&self) -> FlowPhase {
        self.state.lock().await.phase
    }

    /// Portal session id, present once the flow reached `RunningWorkflow`.
    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// Last error message, present when the flow is `Failed`.
    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    /// Snapshot of the append-only flow log.
    pub async fn log(&self) -> Vec<FlowLogEntry> {
        self.state.lock().await.log.clone()
    }

    /// Subscribes to phase-transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Starts a new automation flow for the given contract.
    ///
    /// The contract id is required before any network call: the workflow
    /// bootstrap cannot run without one, so a missing id fails fast as
    /// `PreconditionUnmet`.
    ///
    /// # Errors
    ///
    /// - `AppError::PreconditionUnmet` - no contract id, or a flow is active
    /// - any gateway error from the start call, with the flow left `Failed`
    pub async fn start(
        self: &Arc<Self>,
        contract_id: Option<String>,
    ) -> Result<(), AppError> {
        let contract_id = contract_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                AppError::PreconditionUnmet("No contract selected for registration".to_string())
            })?;

        {
            let mut state = self.state.lock().await;
            if !matches!(state.phase, FlowPhase::Idle) && !state.phase.is_terminal() {
                return Err(AppError::PreconditionUnmet(
                    "An automation flow is already in progress".to_string(),
                ));
            }
            // Fresh flow: previous terminal state is discarded
            *state = FlowState::new();
            state.contract_id = Some(contract_id);
        }

        self.transition(FlowPhase::Starting, "Starting external login session")
            .await;

        let started = match self.api.start_headful_login().await {
            Ok(started) => started,
            Err(e) => {
                // Poll task never spawned, nothing to cancel
                self.fail(&e).await;
                return Err(e);
            }
        };

        {
            let mut state = self.state.lock().await;
            state.flow_id = Some(started.flow_id.clone());
        }

        self.transition(
            FlowPhase::AwaitingExternalLogin,
            "Waiting for login on the external portal",
        )
        .await;

        let token = CancellationToken::new();
        {
            let mut cancel = self.cancel.lock().await;
            // A stale token from a finished flow is replaced
            if let Some(old) = cancel.replace(token.clone()) {
                old.cancel();
            }
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(orchestrator.poll_until_logged_in(started.flow_id, token));

        Ok(())
    }

    /// Tears down the flow: cancels the poll task and any in-flight
    /// finish/workflow chain so no further events fire.
    ///
    /// The token is cancelled under the state lock; every transition the
    /// flow task makes re-checks the token under that same lock, so a
    /// pending finish or workflow call that resolves later is discarded.
    ///
    /// The backend browser session is not cancelled server-side; the backend
    /// reaps abandoned sessions itself.
    pub async fn teardown(&self) {
        let token = self.cancel.lock().await.take();

        let mut state = self.state.lock().await;
        if let Some(token) = token {
            token.cancel();
        }
        if !state.phase.is_terminal() && state.phase != FlowPhase::Idle {
            info!("[FLOW] Torn down from phase {:?}", state.phase);
            state.phase = FlowPhase::Idle;
            state.log.push(FlowLogEntry {
                timestamp_ms: now_ms(),
                message: "Flow torn down".to_string(),
            });
        }
    }

    /// Poll loop: one tick per interval until logged in, cancelled, or
    /// the flow settles.
    async fn poll_until_logged_in(self: Arc<Self>, flow_id: String, cancel: CancellationToken) {
        // Any exit path (including panic unwind) cancels the token
        let _guard = cancel.clone().drop_guard();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[FLOW] Poll task cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            match self.api.poll_status(&flow_id).await {
                Ok(status) if status.logged_in => {
                    // Either this observation settles the flow or another
                    // already did; the poll task is done both ways
                    self.clone().settle_logged_in(&flow_id, cancel.clone()).await;
                    return;
                }
                Ok(_) => {
                    self.append_log("Still waiting for external login").await;
                }
                Err(e) => {
                    // Transient poll failures keep the flow alive
                    warn!("[FLOW] Status poll failed, will retry: {}", e);
                    self.append_log("Status poll failed, retrying").await;
                }
            }
        }
    }

    /// Settles a logged-in observation: finish the headful session once,
    /// then run the registration workflow.
    ///
    /// Every write after an await re-checks the flow token under the state
    /// lock; once `teardown` cancels it the pending chain resolves silently
    /// and never stamps its outcome onto a torn-down or restarted flow.
    ///
    /// Returns false when another observation already claimed the finish.
    async fn settle_logged_in(
        self: Arc<Self>,
        flow_id: &str,
        cancel: CancellationToken,
    ) -> bool {
        // Phase guard: only the first observation moves to Finishing
        {
            let mut state = self.state.lock().await;
            if cancel.is_cancelled() || state.phase != FlowPhase::AwaitingExternalLogin {
                return false;
            }
            state.phase = FlowPhase::Finishing;
            self.record(&mut state, FlowPhase::Finishing, "External login detected, finishing session");
        }

        let finished = match self.api.finish(flow_id).await {
            Ok(finished) => finished,
            Err(e) => {
                self.fail_if_live(&cancel, &e).await;
                return true;
            }
        };

        let contract_id = {
            let mut state = self.state.lock().await;
            // Torn down while finish was in flight; discard the result
            if cancel.is_cancelled() {
                return true;
            }
            state.session_id = Some(finished.session_id.clone());
            state.contract_id.clone()
        };

        // Checked at start(); absent here only if state was torn down badly
        let Some(contract_id) = contract_id else {
            self.fail_if_live(
                &cancel,
                &AppError::PreconditionUnmet("No contract selected for registration".to_string()),
            )
            .await;
            return true;
        };

        if !self
            .transition_if_live(&cancel, FlowPhase::RunningWorkflow, "Running registration workflow")
            .await
        {
            return true;
        }

        match self.api.run_workflow(&finished.session_id, &contract_id).await {
            Ok(outcome) if outcome.success => {
                self.transition_if_live(&cancel, FlowPhase::Completed, "Registration workflow completed")
                    .await;
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "Registration workflow failed".to_string());
                self.fail_if_live(&cancel, &AppError::Internal(message)).await;
            }
            Err(e) => {
                self.fail_if_live(&cancel, &e).await;
            }
        }

        true
    }

    /// Records a failure and moves the flow to `Failed`.
    ///
    /// Used on the start path, before a flow token exists.
    async fn fail(&self, error: &AppError) {
        let message = error.to_presentation().message;
        let mut state = self.state.lock().await;
        state.last_error = Some(message.clone());
        state.phase = FlowPhase::Failed;
        self.record(&mut state, FlowPhase::Failed, &message);
    }

    /// `fail`, but only while the flow token is live.
    async fn fail_if_live(&self, cancel: &CancellationToken, error: &AppError) {
        let message = error.to_presentation().message;
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return;
        }
        state.last_error = Some(message.clone());
        state.phase = FlowPhase::Failed;
        self.record(&mut state, FlowPhase::Failed, &message);
    }

    /// Applies a phase transition, appends a log entry, and emits one event.
    async fn transition(&self, phase: FlowPhase, message: &str) {
        let mut state = self.state.lock().await;
        state.phase = phase;
        self.record(&mut state, phase, message);
    }

    /// `transition`, but only while the flow token is live. Returns false
    /// when the flow was torn down.
    async fn transition_if_live(
        &self,
        cancel: &CancellationToken,
        phase: FlowPhase,
        message: &str,
    ) -> bool {
        let mut state = self.state.lock().await;
        if cancel.is_cancelled() {
            return false;
        }
        state.phase = phase;
        self.record(&mut state, phase, message);
        true
    }

    /// Appends a log entry and emits one event, under the caller's state
    /// lock so nothing fires after a teardown observed that same lock.
    fn record(&self, state: &mut FlowState, phase: FlowPhase, message: &str) {
        let timestamp_ms = now_ms();
        state.log.push(FlowLogEntry {
            timestamp_ms,
            message: message.to_string(),
        });

        info!("[FLOW] {:?}: {}", phase, message);

        // Send fails only when nobody subscribed, which is fine
        let _ = self.events.send(FlowEvent {
            phase,
            message: message.to_string(),
            timestamp_ms,
        });
    }

    /// Appends a log entry without a phase transition (poll ticks).
    async fn append_log(&self, message: &str) {
        let mut state = self.state.lock().await;
        state.log.push(FlowLogEntry {
            timestamp_ms: now_ms(),
            message: message.to_string(),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
