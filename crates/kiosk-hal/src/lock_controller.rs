//! [`LockController`] – idempotent engage/disengage of screen pinning.
//!
//! The controller is the only component that mutates the device's lock
//! state.  It checks device ownership itself, classifies every platform
//! failure into a [`LockError`], and reports each outcome to the operator on
//! the [`EventBus`].
//!
//! The last applied state is cached so a repeated request costs no platform
//! call.  Any failed apply clears the cache, so the next request always goes
//! back to the platform.

use std::sync::Arc;

use kiosk_middleware::EventBus;
use kiosk_types::{DeviceIdentity, EventPayload, LockError, LockState, Notice};
use tracing::{debug, error, info, instrument};

use crate::platform::{LockTaskPlatform, PlatformFault};

const SOURCE: &str = "kiosk-hal::lock_controller";

/// Drives a [`LockTaskPlatform`] on behalf of one [`DeviceIdentity`].
pub struct LockController {
    platform: Arc<dyn LockTaskPlatform>,
    identity: DeviceIdentity,
    bus: EventBus,
    /// Last successfully applied state; `None` when unknown.
    cached: Option<LockState>,
}

impl LockController {
    /// Create a controller with an unknown current state.
    pub fn new(platform: Arc<dyn LockTaskPlatform>, identity: DeviceIdentity, bus: EventBus) -> Self {
        Self {
            platform,
            identity,
            bus,
            cached: None,
        }
    }

    /// Seed the cache with a state observed out-of-band (e.g. at boot).
    pub fn with_initial_state(mut self, state: LockState) -> Self {
        self.cached = Some(state);
        self
    }

    /// Last applied state, `None` if unknown or the last apply failed.
    pub fn state(&self) -> Option<LockState> {
        self.cached
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Pin the screen to this package.
    ///
    /// A no-op success when already locked.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotOwner`] – the package is not the device owner.
    /// - [`LockError::PlatformRejected`] – the OS refused a call.
    /// - [`LockError::Unexpected`] – any other platform failure.
    #[instrument(skip(self), fields(package = %self.identity.package))]
    pub fn engage(&mut self) -> Result<(), LockError> {
        self.transition(LockState::Locked)
    }

    /// Release the screen pin.
    ///
    /// A no-op success when already unlocked.
    ///
    /// # Errors
    ///
    /// Same classification as [`engage`][Self::engage].
    #[instrument(skip(self), fields(package = %self.identity.package))]
    pub fn disengage(&mut self) -> Result<(), LockError> {
        self.transition(LockState::Unlocked)
    }

    fn transition(&mut self, target: LockState) -> Result<(), LockError> {
        let verb = match target {
            LockState::Locked => "enable",
            LockState::Unlocked => "disable",
        };

        if self.cached == Some(target) {
            debug!(state = %target, "lock state already applied");
            self.bus
                .notify(SOURCE, Notice::info(format!("Screen pinning already {verb}d.")));
            return Ok(());
        }

        match self.apply(target) {
            Ok(()) => {
                self.cached = Some(target);
                info!(state = %target, "lock state applied");
                self.bus
                    .notify(SOURCE, Notice::info(format!("Screen pinning {verb}d.")));
                self.bus
                    .announce(SOURCE, EventPayload::LockStateChanged(target));
                Ok(())
            }
            Err(e) => {
                self.cached = None;
                error!(state = %target, error = %e, retryable = e.is_retryable(), "failed to apply lock state");
                self.bus.notify(
                    SOURCE,
                    Notice::error(format!("Failed to {verb} screen pinning: {e}")),
                );
                Err(e)
            }
        }
    }

    fn apply(&self, target: LockState) -> Result<(), LockError> {
        let DeviceIdentity { component, package } = &self.identity;

        if !self
            .platform
            .is_device_owner_app(package)
            .map_err(classify)?
        {
            return Err(LockError::NotOwner);
        }

        match target {
            LockState::Locked => {
                self.platform
                    .set_lock_task_packages(component, std::slice::from_ref(package))
                    .map_err(classify)?;
                self.platform.start_lock_task().map_err(classify)
            }
            LockState::Unlocked => {
                self.platform
                    .set_lock_task_packages(component, &[])
                    .map_err(classify)?;
                self.platform.stop_lock_task().map_err(classify)
            }
        }
    }
}

fn classify(fault: PlatformFault) -> LockError {
    match fault {
        PlatformFault::Security(msg) => LockError::PlatformRejected(msg),
        PlatformFault::Other(msg) => LockError::Unexpected(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimLockTask};
    use kiosk_middleware::{Topic, TopicReceiver};
    use kiosk_types::{Event, Severity};

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("com.example.crew/.KioskAdminReceiver", "com.example.crew")
    }

    fn controller(owner: bool) -> (SimLockTask, LockController, TopicReceiver) {
        let sim = SimLockTask::new(owner);
        let bus = EventBus::default();
        let notices = bus.subscribe_to(Topic::Notices);
        let ctl = LockController::new(Arc::new(sim.clone()), identity(), bus);
        (sim, ctl, notices)
    }

    fn messages(events: Vec<Event>) -> Vec<(Severity, String)> {
        events
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::Notice(n) => Some((n.severity, n.message)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn engage_pins_only_this_package() {
        let (sim, mut ctl, _) = controller(true);
        ctl.engage().unwrap();
        assert_eq!(sim.state(), LockState::Locked);
        assert_eq!(sim.packages(), vec!["com.example.crew".to_string()]);
        assert_eq!(ctl.state(), Some(LockState::Locked));
    }

    #[test]
    fn engage_twice_is_idempotent() {
        let (sim, mut ctl, mut notices) = controller(true);
        assert!(ctl.engage().is_ok());
        assert!(ctl.engage().is_ok());
        assert_eq!(sim.state(), LockState::Locked);
        assert_eq!(sim.count(SimCall::StartLockTask), 1);
        assert_eq!(
            messages(notices.drain()),
            vec![
                (Severity::Info, "Screen pinning enabled.".to_string()),
                (Severity::Info, "Screen pinning already enabled.".to_string()),
            ]
        );
    }

    #[test]
    fn disengage_clears_allow_list_and_stops() {
        let (sim, mut ctl, _) = controller(true);
        ctl.engage().unwrap();
        ctl.disengage().unwrap();
        assert_eq!(sim.state(), LockState::Unlocked);
        assert!(sim.packages().is_empty());
        assert_eq!(sim.count(SimCall::StopLockTask), 1);
    }

    #[test]
    fn disengage_when_already_unlocked_is_a_noop() {
        let (sim, ctl, mut notices) = controller(true);
        let mut ctl = ctl.with_initial_state(LockState::Unlocked);
        assert!(ctl.disengage().is_ok());
        assert_eq!(sim.calls(), vec![]);
        assert_eq!(
            messages(notices.drain()),
            vec![(Severity::Info, "Screen pinning already disabled.".to_string())]
        );
    }

    #[test]
    fn not_owner_is_reported_and_nothing_is_pinned() {
        let (sim, mut ctl, mut notices) = controller(false);
        assert_eq!(ctl.engage(), Err(LockError::NotOwner));
        assert_eq!(sim.state(), LockState::Unlocked);
        assert_eq!(sim.calls(), vec![SimCall::IsDeviceOwnerApp]);
        let notes = messages(notices.drain());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, Severity::Error);
        assert!(notes[0].1.contains("not the device owner"));
    }

    #[test]
    fn security_fault_is_platform_rejected() {
        let (sim, mut ctl, _) = controller(true);
        sim.fail_next(SimCall::StartLockTask, PlatformFault::Security("lock task not permitted".into()));
        assert_eq!(
            ctl.engage(),
            Err(LockError::PlatformRejected("lock task not permitted".into()))
        );
    }

    #[test]
    fn other_fault_is_unexpected() {
        let (sim, mut ctl, _) = controller(true);
        sim.fail_next(SimCall::SetLockTaskPackages, PlatformFault::Other("binder died".into()));
        assert_eq!(ctl.engage(), Err(LockError::Unexpected("binder died".into())));
    }

    #[test]
    fn failure_invalidates_cache_and_next_call_retries() {
        let (sim, ctl, _) = controller(true);
        let mut ctl = ctl.with_initial_state(LockState::Unlocked);
        sim.fail_next(SimCall::StartLockTask, PlatformFault::Other("transient".into()));
        assert!(ctl.engage().is_err());
        assert_eq!(ctl.state(), None);

        assert!(ctl.engage().is_ok());
        assert_eq!(sim.state(), LockState::Locked);
        assert_eq!(ctl.state(), Some(LockState::Locked));
    }

    #[test]
    fn failed_disengage_after_lock_retries_next_time() {
        let (sim, mut ctl, _) = controller(true);
        ctl.engage().unwrap();
        sim.fail_next(SimCall::StopLockTask, PlatformFault::Security("denied".into()));
        assert!(ctl.disengage().is_err());
        assert_eq!(ctl.state(), None);
        assert!(ctl.disengage().is_ok());
        assert_eq!(sim.state(), LockState::Unlocked);
    }

    #[test]
    fn successful_transition_announces_state_change() {
        let sim = SimLockTask::new(true);
        let bus = EventBus::default();
        let mut changes = bus.subscribe_to(Topic::StateChanges);
        let mut ctl = LockController::new(Arc::new(sim), identity(), bus);
        ctl.engage().unwrap();
        let event = changes.try_recv().expect("state change");
        assert!(matches!(
            event.payload,
            EventPayload::LockStateChanged(LockState::Locked)
        ));
    }
}
