//! `kiosk-hal` – Lock-Down Abstraction Layer
//!
//! - [`platform`] – the [`LockTaskPlatform`] trait wrapping the OS
//!   lock-task primitives, and [`PlatformFault`].
//! - [`lock_controller`] – [`LockController`], idempotent engage/disengage
//!   with failure classification and operator notices.
//! - [`sim`] – [`SimLockTask`][sim::SimLockTask], an in-process platform for
//!   tests and device-less runs.

pub mod lock_controller;
pub mod platform;
pub mod sim;

pub use lock_controller::LockController;
pub use platform::{LockTaskPlatform, PlatformFault};
pub use sim::{SimCall, SimLockTask};
