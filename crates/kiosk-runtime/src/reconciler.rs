//! [`Reconciler`] – maps each remote signal to a lock-down action.
//!
//! | Delivery | Action |
//! |---|---|
//! | `Locked` | `engage()` if the [`PrivilegeGate`] grants it *right now*, otherwise a "privilege required" notice |
//! | `Unlocked` | `disengage()`; the controller applies its own device-owner check |
//! | `Invalid(reason)` | nothing, warning notice |
//! | `ChannelError(message)` | nothing, error notice |
//!
//! The reconciler never requests privilege on its own; that stays an
//! explicit operator action.  Nothing it does is fatal: every outcome is
//! logged, surfaced, and returned as a [`ReconcileOutcome`].
//!
//! Only `engage()` is gated on the admin grant.  `disengage()` is always
//! attempted so a device can be released even after the grant was revoked.

use kiosk_hal::LockController;
use kiosk_kernel::PrivilegeGate;
use kiosk_middleware::EventBus;
use kiosk_types::{FlagUpdate, LockError, LockSignal, Notice};
use tracing::{info, warn};

const SOURCE: &str = "kiosk-runtime::reconciler";

/// What a single reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Lock-down is in place (newly applied or already applied).
    Engaged,
    /// Lock-down is released (newly released or already released).
    Disengaged,
    /// A `Locked` signal arrived without the admin grant.
    PrivilegeRequired,
    /// The signal was invalid; nothing changed.
    Ignored,
    /// The channel reported a failure; nothing changed.
    ChannelFault,
    /// The controller failed.
    Failed(LockError),
}

/// Owns the privilege gate and the lock controller and drives one device
/// toward the most recently observed signal.
pub struct Reconciler {
    gate: PrivilegeGate,
    controller: LockController,
    bus: EventBus,
}

impl Reconciler {
    pub fn new(gate: PrivilegeGate, controller: LockController, bus: EventBus) -> Self {
        Self {
            gate,
            controller,
            bus,
        }
    }

    pub fn gate(&self) -> &PrivilegeGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut PrivilegeGate {
        &mut self.gate
    }

    pub fn controller(&self) -> &LockController {
        &self.controller
    }

    /// Reconcile one watcher delivery.
    pub fn on_update(&mut self, update: FlagUpdate) -> ReconcileOutcome {
        match update {
            FlagUpdate::Signal(signal) => self.on_signal(signal),
            FlagUpdate::ChannelError(message) => {
                warn!(%message, "failed to read kiosk mode; keeping current state");
                self.bus.notify(
                    SOURCE,
                    Notice::error(format!("Failed to read kiosk mode: {message}")),
                );
                ReconcileOutcome::ChannelFault
            }
        }
    }

    /// Reconcile one normalized signal.
    pub fn on_signal(&mut self, signal: LockSignal) -> ReconcileOutcome {
        info!(?signal, "screen pinning mode received");
        match signal {
            LockSignal::Locked => {
                // Re-check on every call: a grant or revoke may have landed
                // since the last signal.
                if !self.gate.is_granted() {
                    warn!(privilege = %self.gate.state(), "kiosk mode requested without admin privilege");
                    self.bus.notify(
                        SOURCE,
                        Notice::warning(
                            "Privilege required: admin permissions are not granted, kiosk mode stays off.",
                        ),
                    );
                    return ReconcileOutcome::PrivilegeRequired;
                }
                match self.controller.engage() {
                    Ok(()) => ReconcileOutcome::Engaged,
                    Err(e) => ReconcileOutcome::Failed(e),
                }
            }
            LockSignal::Unlocked => match self.controller.disengage() {
                Ok(()) => ReconcileOutcome::Disengaged,
                Err(e) => ReconcileOutcome::Failed(e),
            },
            LockSignal::Invalid(reason) => {
                warn!(%reason, "invalid screen pinning mode value");
                self.bus.notify(
                    SOURCE,
                    Notice::warning(format!("Invalid kiosk mode value ({reason}).")),
                );
                ReconcileOutcome::Ignored
            }
        }
    }
}
