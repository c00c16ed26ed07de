//! Generic `LockTaskPlatform` trait for the OS lock-down primitive.
//!
//! Drivers implement this trait and hand it to a
//! [`LockController`][crate::lock_controller::LockController].  The rest of
//! the agent only ever talks to the controller, so the platform can be
//! swapped (real device, simulator) without touching reconciliation logic.

use thiserror::Error;

/// A failed platform call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformFault {
    /// The OS refused the call for security reasons.
    #[error("security exception: {0}")]
    Security(String),
    /// Anything else the platform threw.
    #[error("{0}")]
    Other(String),
}

/// Device-policy calls needed to pin and unpin the screen.
pub trait LockTaskPlatform: Send + Sync {
    /// `true` when `package` is the device owner.
    fn is_device_owner_app(&self, package: &str) -> Result<bool, PlatformFault>;

    /// Replace the lock-task allow-list for `component` with `packages`.
    fn set_lock_task_packages(
        &self,
        component: &str,
        packages: &[String],
    ) -> Result<(), PlatformFault>;

    /// Pin the current task.
    fn start_lock_task(&self) -> Result<(), PlatformFault>;

    /// Release the pinned task.
    fn stop_lock_task(&self) -> Result<(), PlatformFault>;
}
