//! [`PrivilegeGate`] – check/request protocol for device-admin privilege.
//!
//! The gate tracks a [`PrivilegeState`] that only changes through an
//! explicit [`check`][PrivilegeGate::check], [`request`][PrivilegeGate::request],
//! grant outcome, or grant timeout:
//!
//! ```text
//! Unknown --request()--> Requested --on_grant_result(true)--> Granted
//!                        Requested --on_grant_result(false)-> Denied
//!                        Requested --on_grant_timeout(n)----> Denied
//! Granted / Denied --request()--> Requested
//! ```
//!
//! [`is_granted`][PrivilegeGate::is_granted] combines the tracked state with
//! a live query of the OS admin registry, so callers must ask it again right
//! before every privileged action.

use std::sync::Arc;

use kiosk_types::{KioskError, PrivilegeState};
use tracing::{debug, info, warn};

/// Explanation shown in the OS privilege-grant dialog.
pub const DEFAULT_EXPLANATION: &str = "Admin permissions are required for enabling kiosk mode.";

/// The OS admin registry.
///
/// Implementations wrap the platform's device-policy service.  The grant
/// dialog started by [`request_admin`][AdminRegistry::request_admin] reports
/// its outcome out-of-band, through
/// [`PrivilegeGate::on_grant_result`].
pub trait AdminRegistry: Send + Sync {
    /// `true` when `component` is an active device admin.
    fn is_admin_active(&self, component: &str) -> bool;

    /// Launch the privilege-grant dialog for `component`.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::Privilege`] when the dialog could not be shown.
    fn request_admin(&self, component: &str, explanation: &str) -> Result<(), KioskError>;
}

/// Owns the [`PrivilegeState`] for one admin component.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use kiosk_kernel::{PrivilegeGate, SimAdminRegistry};
/// use kiosk_types::PrivilegeState;
///
/// let registry = SimAdminRegistry::new();
/// let mut gate = PrivilegeGate::new(Arc::new(registry.clone()), "pkg/.Admin");
///
/// let attempt = gate.request().unwrap();
/// assert_eq!(attempt, 1);
/// assert_eq!(gate.state(), PrivilegeState::Requested);
///
/// registry.set_active(true);
/// gate.on_grant_result(true);
/// assert!(gate.is_granted());
/// ```
pub struct PrivilegeGate {
    registry: Arc<dyn AdminRegistry>,
    component: String,
    explanation: String,
    state: PrivilegeState,
    /// Number of requests issued so far; identifies the outstanding one.
    attempt: u64,
    /// The current attempt expired unanswered; its dialog may still answer.
    timed_out: bool,
}

impl PrivilegeGate {
    /// Create a gate for `component` in the [`PrivilegeState::Unknown`] state.
    pub fn new(registry: Arc<dyn AdminRegistry>, component: impl Into<String>) -> Self {
        Self {
            registry,
            component: component.into(),
            explanation: DEFAULT_EXPLANATION.to_string(),
            state: PrivilegeState::Unknown,
            attempt: 0,
            timed_out: false,
        }
    }

    /// Replace the text shown in the grant dialog.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    /// Current tracked state.
    pub fn state(&self) -> PrivilegeState {
        self.state
    }

    /// The admin component this gate guards.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Number of the most recent request, `0` if none was ever issued.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// `true` only when the grant was recorded *and* the OS still reports the
    /// component as an active admin.  Has no side effects.
    pub fn is_granted(&self) -> bool {
        self.state == PrivilegeState::Granted && self.registry.is_admin_active(&self.component)
    }

    /// Probe the registry once at startup.
    ///
    /// An [`Unknown`][PrivilegeState::Unknown] gate whose component is
    /// already active becomes [`Granted`][PrivilegeState::Granted]; every
    /// other state is left alone.
    pub fn check(&mut self) -> PrivilegeState {
        if self.state == PrivilegeState::Unknown && self.registry.is_admin_active(&self.component) {
            info!(component = %self.component, "admin permissions already granted");
            self.state = PrivilegeState::Granted;
        }
        self.state
    }

    /// Start the OS grant flow and move to
    /// [`Requested`][PrivilegeState::Requested].
    ///
    /// Allowed from any state so that an operator can retry after a denial
    /// or re-confirm a grant.  Returns the attempt number that a later
    /// [`on_grant_timeout`][Self::on_grant_timeout] must carry.
    ///
    /// # Errors
    ///
    /// Returns [`KioskError::Privilege`] if the dialog could not be launched;
    /// the state is left unchanged in that case.
    pub fn request(&mut self) -> Result<u64, KioskError> {
        self.registry
            .request_admin(&self.component, &self.explanation)?;
        self.attempt += 1;
        self.timed_out = false;
        self.state = PrivilegeState::Requested;
        info!(component = %self.component, attempt = self.attempt, "admin privilege requested");
        Ok(self.attempt)
    }

    /// Whether a dialog outcome would be recorded now: a request is
    /// outstanding, or the current one timed out and its dialog answers late.
    pub fn awaiting_result(&self) -> bool {
        self.state == PrivilegeState::Requested
            || (self.state == PrivilegeState::Denied && self.timed_out)
    }

    /// Record the outcome of the grant dialog.
    ///
    /// Returns the new state.  Outcomes that arrive while
    /// [`awaiting_result`][Self::awaiting_result] is `false` are logged and
    /// ignored.
    pub fn on_grant_result(&mut self, granted: bool) -> PrivilegeState {
        if !self.awaiting_result() {
            warn!(
                state = %self.state,
                granted,
                "grant result received with no outstanding request; ignoring"
            );
            return self.state;
        }
        self.timed_out = false;
        self.state = if granted {
            info!(component = %self.component, "admin permissions granted");
            PrivilegeState::Granted
        } else {
            warn!(component = %self.component, "admin permissions not granted");
            PrivilegeState::Denied
        };
        self.state
    }

    /// Expire request number `attempt` if it is still unanswered.
    ///
    /// Returns `true` when the gate moved to
    /// [`Denied`][PrivilegeState::Denied].
    pub fn on_grant_timeout(&mut self, attempt: u64) -> bool {
        if self.state == PrivilegeState::Requested && attempt == self.attempt {
            warn!(component = %self.component, attempt, "admin privilege request timed out");
            self.state = PrivilegeState::Denied;
            self.timed_out = true;
            true
        } else {
            debug!(attempt, current = self.attempt, state = %self.state, "stale grant timeout");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAdminRegistry;

    const COMPONENT: &str = "com.example.crew/.KioskAdminReceiver";

    fn gate() -> (SimAdminRegistry, PrivilegeGate) {
        let registry = SimAdminRegistry::new();
        let gate = PrivilegeGate::new(Arc::new(registry.clone()), COMPONENT);
        (registry, gate)
    }

    #[test]
    fn new_gate_is_unknown_and_not_granted() {
        let (_, gate) = gate();
        assert_eq!(gate.state(), PrivilegeState::Unknown);
        assert!(!gate.is_granted());
    }

    #[test]
    fn check_promotes_already_active_admin() {
        let (registry, mut gate) = gate();
        registry.set_active(true);
        assert_eq!(gate.check(), PrivilegeState::Granted);
        assert!(gate.is_granted());
    }

    #[test]
    fn check_leaves_inactive_admin_unknown() {
        let (_, mut gate) = gate();
        assert_eq!(gate.check(), PrivilegeState::Unknown);
    }

    #[test]
    fn check_does_not_override_denial() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        gate.on_grant_result(false);
        registry.set_active(true);
        assert_eq!(gate.check(), PrivilegeState::Denied);
        assert!(!gate.is_granted());
    }

    #[test]
    fn request_launches_dialog_with_explanation() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        assert_eq!(registry.request_count(), 1);
        assert_eq!(
            registry.last_explanation().as_deref(),
            Some(DEFAULT_EXPLANATION)
        );
        assert_eq!(gate.state(), PrivilegeState::Requested);
    }

    #[test]
    fn grant_then_is_granted() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        registry.set_active(true);
        assert_eq!(gate.on_grant_result(true), PrivilegeState::Granted);
        assert!(gate.is_granted());
    }

    #[test]
    fn denial_is_recoverable_by_new_request() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        assert_eq!(gate.on_grant_result(false), PrivilegeState::Denied);
        assert!(!gate.is_granted());

        assert_eq!(gate.request().unwrap(), 2);
        registry.set_active(true);
        gate.on_grant_result(true);
        assert!(gate.is_granted());
    }

    #[test]
    fn revoked_admin_is_not_granted_even_after_grant() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        registry.set_active(true);
        gate.on_grant_result(true);
        registry.set_active(false);
        assert_eq!(gate.state(), PrivilegeState::Granted);
        assert!(!gate.is_granted());
    }

    #[test]
    fn unsolicited_grant_result_is_ignored() {
        let (registry, mut gate) = gate();
        registry.set_active(true);
        assert_eq!(gate.on_grant_result(true), PrivilegeState::Unknown);
        assert!(!gate.is_granted());
    }

    #[test]
    fn timeout_denies_outstanding_request() {
        let (_, mut gate) = gate();
        let attempt = gate.request().unwrap();
        assert!(gate.on_grant_timeout(attempt));
        assert_eq!(gate.state(), PrivilegeState::Denied);
    }

    #[test]
    fn late_grant_after_timeout_is_recorded() {
        let (registry, mut gate) = gate();
        let attempt = gate.request().unwrap();
        assert!(gate.on_grant_timeout(attempt));
        assert!(gate.awaiting_result());

        registry.set_active(true);
        assert_eq!(gate.on_grant_result(true), PrivilegeState::Granted);
        assert!(gate.is_granted());
        assert!(!gate.awaiting_result());
    }

    #[test]
    fn result_after_explicit_denial_is_ignored() {
        let (registry, mut gate) = gate();
        gate.request().unwrap();
        gate.on_grant_result(false);
        assert!(!gate.awaiting_result());

        registry.set_active(true);
        assert_eq!(gate.on_grant_result(true), PrivilegeState::Denied);
        assert!(!gate.is_granted());
    }

    #[test]
    fn stale_timeout_is_ignored() {
        let (registry, mut gate) = gate();
        let first = gate.request().unwrap();
        let _second = gate.request().unwrap();
        assert!(!gate.on_grant_timeout(first));
        assert_eq!(gate.state(), PrivilegeState::Requested);

        registry.set_active(true);
        gate.on_grant_result(true);
        assert!(!gate.on_grant_timeout(2));
        assert_eq!(gate.state(), PrivilegeState::Granted);
    }

    #[test]
    fn failed_launch_leaves_state_unchanged() {
        let (registry, mut gate) = gate();
        registry.set_request_failure(Some("no activity to handle intent"));
        let result = gate.request();
        assert!(matches!(result, Err(KioskError::Privilege(_))));
        assert_eq!(gate.state(), PrivilegeState::Unknown);
        assert_eq!(gate.attempt(), 0);
    }

    #[test]
    fn custom_explanation_is_forwarded() {
        let registry = SimAdminRegistry::new();
        let mut gate = PrivilegeGate::new(Arc::new(registry.clone()), COMPONENT)
            .with_explanation("Needed for the crew tablet.");
        gate.request().unwrap();
        assert_eq!(
            registry.last_explanation().as_deref(),
            Some("Needed for the crew tablet.")
        );
    }
}
