//! `kiosk-kernel` – Privilege & Safety
//!
//! Owns the elevated permission the agent needs before it may pin the
//! screen.  It does not touch lock-down itself; it only answers "may we?".
//!
//! # Modules
//!
//! - [`privilege_gate`] – [`PrivilegeGate`][privilege_gate::PrivilegeGate]:
//!   the check/request protocol for device-admin privilege and the
//!   [`PrivilegeState`][kiosk_types::PrivilegeState] machine driven by
//!   grant outcomes and timeouts.
//! - [`sim`] – [`SimAdminRegistry`][sim::SimAdminRegistry]: an in-process
//!   [`AdminRegistry`][privilege_gate::AdminRegistry] for tests and for
//!   running the agent without a real device.

pub mod privilege_gate;
pub mod sim;

pub use privilege_gate::{AdminRegistry, DEFAULT_EXPLANATION, PrivilegeGate};
pub use sim::SimAdminRegistry;
