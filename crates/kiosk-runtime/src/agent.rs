//! [`KioskAgent`] – the single-consumer reconciliation loop.
//!
//! Every input the agent reacts to arrives as an [`AgentInput`] on one
//! bounded [`mpsc`] queue:
//!
//! 1. **Flag** – a [`FlagUpdate`] pushed by the
//!    [`RemoteFlagWatcher`][kiosk_middleware::RemoteFlagWatcher].
//! 2. **GrantResult** – the out-of-band answer of the privilege dialog.
//! 3. **RequestPrivilege** – the operator asks for the dialog (again).
//! 4. **GrantTimeout** – a scheduled expiry of an unanswered request.
//! 5. **Shutdown** – stop the loop.
//!
//! Inputs are handled one at a time, to completion, in arrival order, so a
//! burst of deliveries resolves to last-write-wins without any locking.
//!
//! # Grant timeout
//!
//! When [`AgentConfig::grant_timeout`] is set, every privilege request
//! schedules a `GrantTimeout` for that attempt.  If the dialog is still
//! unanswered when it fires, the gate moves to `Denied` and the operator is
//! told to retry.  A late answer from that same dialog is still recorded.
//! With `None` the agent waits indefinitely.
//!
//! # Re-apply after grant
//!
//! The last signal is remembered for the lifetime of the process.  When a
//! grant lands after a `Locked` signal was refused, that signal is
//! reconciled again immediately instead of waiting for the next delivery.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kiosk_hal::{LockController, SimLockTask};
//! use kiosk_kernel::{PrivilegeGate, SimAdminRegistry};
//! use kiosk_middleware::EventBus;
//! use kiosk_runtime::{AgentConfig, KioskAgent, Reconciler};
//! use kiosk_types::DeviceIdentity;
//!
//! # async fn demo() {
//! let bus = EventBus::default();
//! let identity = DeviceIdentity::new("pkg/.Admin", "pkg");
//! let gate = PrivilegeGate::new(Arc::new(SimAdminRegistry::new()), "pkg/.Admin");
//! let controller = LockController::new(Arc::new(SimLockTask::new(true)), identity, bus.clone());
//!
//! let (agent, handle) = KioskAgent::new(
//!     Reconciler::new(gate, controller, bus.clone()),
//!     bus,
//!     AgentConfig::default(),
//! );
//! let task = tokio::spawn(agent.run());
//! handle.shutdown().await.ok();
//! task.await.ok();
//! # }
//! ```

use std::ops::ControlFlow;
use std::time::Duration;

use kiosk_middleware::EventBus;
use kiosk_types::{
    AgentInput, EventPayload, FlagUpdate, KioskError, LockSignal, Notice, PrivilegeState,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;

const SOURCE: &str = "kiosk-runtime::agent";

/// Default time the operator has to answer the grant dialog.
pub const DEFAULT_GRANT_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration bundle for [`KioskAgent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// How long an unanswered privilege request stays outstanding.
    /// `None` waits indefinitely.
    pub grant_timeout: Option<Duration>,
    /// Open the grant dialog at startup when privilege is missing.
    pub request_privilege_on_start: bool,
    /// Capacity of the inbound queue.
    pub queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            grant_timeout: Some(DEFAULT_GRANT_TIMEOUT),
            request_privilege_on_start: true,
            queue_capacity: 64,
        }
    }
}

/// Cloneable sender side of the agent's inbound queue.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentInput>,
}

impl AgentHandle {
    /// The raw queue sender, for wiring a
    /// [`RemoteFlagWatcher`][kiosk_middleware::RemoteFlagWatcher] subscription.
    pub fn sender(&self) -> mpsc::Sender<AgentInput> {
        self.tx.clone()
    }

    /// Enqueue `input`.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::Bus`] when the agent has stopped.
    pub async fn send(&self, input: AgentInput) -> Result<(), KioskError> {
        self.tx
            .send(input)
            .await
            .map_err(|e| KioskError::Bus(format!("agent queue closed: {e}")))
    }

    /// Enqueue `input` from a thread that is not running async code.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::Bus`] when the agent has stopped.
    pub fn send_blocking(&self, input: AgentInput) -> Result<(), KioskError> {
        self.tx
            .blocking_send(input)
            .map_err(|e| KioskError::Bus(format!("agent queue closed: {e}")))
    }

    /// Deliver the outcome of the grant dialog.
    pub async fn grant_result(&self, granted: bool) -> Result<(), KioskError> {
        self.send(AgentInput::GrantResult(granted)).await
    }

    /// Ask the agent to open the grant dialog.
    pub async fn request_privilege(&self) -> Result<(), KioskError> {
        self.send(AgentInput::RequestPrivilege).await
    }

    /// Stop the agent loop.
    pub async fn shutdown(&self) -> Result<(), KioskError> {
        self.send(AgentInput::Shutdown).await
    }
}

/// The reconciliation loop for one device.
pub struct KioskAgent {
    reconciler: Reconciler,
    bus: EventBus,
    config: AgentConfig,
    inbox: mpsc::Receiver<AgentInput>,
    /// Used to schedule grant timeouts without keeping the queue open.
    timer_tx: mpsc::WeakSender<AgentInput>,
    last_signal: Option<LockSignal>,
}

impl KioskAgent {
    /// Build the agent and the handle that feeds it.
    pub fn new(reconciler: Reconciler, bus: EventBus, config: AgentConfig) -> (Self, AgentHandle) {
        let (tx, inbox) = mpsc::channel(config.queue_capacity.max(1));
        let agent = Self {
            reconciler,
            bus,
            config,
            inbox,
            timer_tx: tx.downgrade(),
            last_signal: None,
        };
        (agent, AgentHandle { tx })
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Most recent signal seen, if any.
    pub fn last_signal(&self) -> Option<&LockSignal> {
        self.last_signal.as_ref()
    }

    /// Probe privilege once and, if configured, open the grant dialog.
    ///
    /// Must be called from within a Tokio runtime when a grant timeout is
    /// configured.
    pub fn start(&mut self) -> PrivilegeState {
        let state = self.reconciler.gate_mut().check();
        self.announce_privilege(state);
        if state == PrivilegeState::Granted {
            self.bus
                .notify(SOURCE, Notice::info("Admin permissions already granted."));
        } else if self.config.request_privilege_on_start {
            self.request_privilege();
        } else {
            self.bus.notify(
                SOURCE,
                Notice::warning("Admin permissions are not granted; use /request to ask for them."),
            );
        }
        self.reconciler.gate().state()
    }

    /// Run [`start`][Self::start], then process inputs until `Shutdown` or
    /// until every [`AgentHandle`] is dropped.  Returns the reconciler so
    /// callers can inspect the final state.
    pub async fn run(mut self) -> Reconciler {
        self.start();
        info!("kiosk agent running");
        while let Some(input) = self.inbox.recv().await {
            if self.handle(input).is_break() {
                break;
            }
        }
        info!("kiosk agent stopped");
        self.reconciler
    }

    /// Handle a single input to completion.
    pub fn handle(&mut self, input: AgentInput) -> ControlFlow<()> {
        match input {
            AgentInput::Flag(update) => {
                if let FlagUpdate::Signal(signal) = &update {
                    self.last_signal = Some(signal.clone());
                }
                let outcome = self.reconciler.on_update(update);
                debug!(?outcome, "reconciled flag update");
            }
            AgentInput::GrantResult(granted) => self.on_grant_result(granted),
            AgentInput::RequestPrivilege => self.request_privilege(),
            AgentInput::GrantTimeout { attempt } => {
                if self.reconciler.gate_mut().on_grant_timeout(attempt) {
                    self.announce_privilege(PrivilegeState::Denied);
                    self.bus.notify(
                        SOURCE,
                        Notice::warning(
                            "Admin permission request timed out. Please try again.",
                        ),
                    );
                }
            }
            AgentInput::Shutdown => {
                info!("shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_grant_result(&mut self, granted: bool) {
        if !self.reconciler.gate().awaiting_result() {
            let state = self.reconciler.gate().state();
            warn!(%state, granted, "grant result with no pending request");
            self.bus.notify(
                SOURCE,
                Notice::warning(format!(
                    "No admin permission request is pending (privilege {state}); use /request to ask again."
                )),
            );
            return;
        }
        let after = self.reconciler.gate_mut().on_grant_result(granted);
        self.announce_privilege(after);
        match after {
            PrivilegeState::Granted => {
                self.bus
                    .notify(SOURCE, Notice::info("Admin permissions granted."));
                if self.last_signal == Some(LockSignal::Locked) {
                    info!("re-applying pending kiosk mode after grant");
                    let outcome = self.reconciler.on_signal(LockSignal::Locked);
                    debug!(?outcome, "reconciled pending signal");
                }
            }
            _ => self.bus.notify(
                SOURCE,
                Notice::error("Admin permissions not granted. Please try again."),
            ),
        }
    }

    fn request_privilege(&mut self) {
        let attempt = match self.reconciler.gate_mut().request() {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(error = %e, "could not open the privilege dialog");
                self.bus.notify(
                    SOURCE,
                    Notice::error(format!("Could not request admin permissions: {e}")),
                );
                return;
            }
        };
        self.announce_privilege(PrivilegeState::Requested);
        self.bus.notify(
            SOURCE,
            Notice::info("Admin permissions requested; waiting for confirmation."),
        );

        if let Some(timeout) = self.config.grant_timeout {
            // Weak until it fires, so a pending timer never keeps the queue open.
            let timer_tx = self.timer_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                match timer_tx.upgrade() {
                    Some(tx) => {
                        let _ = tx.send(AgentInput::GrantTimeout { attempt }).await;
                    }
                    None => debug!(attempt, "agent stopped before grant timeout fired"),
                }
            });
        }
    }

    fn announce_privilege(&self, state: PrivilegeState) {
        self.bus
            .announce(SOURCE, EventPayload::PrivilegeChanged(state));
    }
}
