//! `kiosk-runtime` – reconciliation of the remote kiosk flag against the
//! device's lock-task state.
//!
//! # Modules
//!
//! - [`reconciler`] – [`Reconciler`]: maps one [`FlagUpdate`][kiosk_types::FlagUpdate]
//!   onto the [`LockController`][kiosk_hal::LockController], consulting the
//!   [`PrivilegeGate`][kiosk_kernel::PrivilegeGate] before any engage.
//! - [`agent`] – [`KioskAgent`]: the single-consumer queue that serialises
//!   flag deliveries, grant results and timeouts into the reconciler.
//! - [`telemetry`] – [`init_tracing`]: console logging plus optional OTLP
//!   span export.
//!
//! Disengage never waits on the gate; the controller's own device-owner
//! check decides whether the device can be unpinned.

pub mod agent;
pub mod reconciler;
pub mod telemetry;

pub use agent::{AgentConfig, AgentHandle, DEFAULT_GRANT_TIMEOUT, KioskAgent};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use telemetry::{TracerProviderGuard, init_tracing};
