use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Desired lock state as published by the remote flag, normalized at the
/// watcher boundary so that "no value yet" can never be read as "false".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockSignal {
    /// The remote flag is `true`: pin the screen to this app.
    Locked,
    /// The remote flag is `false`: release the pin.
    Unlocked,
    /// The remote flag is absent, `null`, or not a boolean.
    Invalid(String),
}

impl LockSignal {
    /// The [`LockState`] this signal asks for, or `None` for
    /// [`LockSignal::Invalid`].
    pub fn desired_state(&self) -> Option<LockState> {
        match self {
            LockSignal::Locked => Some(LockState::Locked),
            LockSignal::Unlocked => Some(LockState::Unlocked),
            LockSignal::Invalid(_) => None,
        }
    }
}

/// A single delivery from the remote flag watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagUpdate {
    /// A value was read and normalized.
    Signal(LockSignal),
    /// The channel reported a read or permission failure.  No lock
    /// transition may be derived from it.
    ChannelError(String),
}

impl From<LockSignal> for FlagUpdate {
    fn from(signal: LockSignal) -> Self {
        FlagUpdate::Signal(signal)
    }
}

/// Lifecycle of the elevated permission needed to control lock-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrivilegeState {
    #[default]
    Unknown,
    Requested,
    Granted,
    Denied,
}

impl fmt::Display for PrivilegeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeState::Unknown => write!(f, "unknown"),
            PrivilegeState::Requested => write!(f, "requested"),
            PrivilegeState::Granted => write!(f, "granted"),
            PrivilegeState::Denied => write!(f, "denied"),
        }
    }
}

/// Enforced lock-down state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    Locked,
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => write!(f, "locked"),
            LockState::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Binding between this agent and the OS admin/owner record.
///
/// `component` names the admin receiver registered with the OS and
/// `package` is the application that gets pinned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub component: String,
    pub package: String,
}

impl DeviceIdentity {
    pub fn new(component: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            package: package.into(),
        }
    }
}

/// Messages accepted by the agent's single-consumer inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentInput {
    /// A delivery from the remote flag watcher.
    Flag(FlagUpdate),
    /// Out-of-band outcome of the privilege-grant dialog.
    GrantResult(bool),
    /// Operator asked to (re)open the privilege-grant dialog.
    RequestPrivilege,
    /// The grant dialog for request number `attempt` went unanswered.
    GrantTimeout { attempt: u64 },
    /// Stop processing inputs.
    Shutdown,
}

impl From<FlagUpdate> for AgentInput {
    fn from(update: FlagUpdate) -> Self {
        AgentInput::Flag(update)
    }
}

/// Unified event wrapper for the operator-notification bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "kiosk-hal::lock_controller"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// One-line, human-readable status for the operator.
    Notice(Notice),
    /// The controller applied a new lock state.
    LockStateChanged(LockState),
    /// The privilege gate moved to a new state.
    PrivilegeChanged(PrivilegeState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Free-form operator notification.  Not meant to be machine-parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Failure of a lock-down operation, classified by how the caller may
/// recover.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockError {
    /// The app is not the device owner.  Retrying is pointless until the
    /// privilege changes.
    #[error("App is not the device owner")]
    NotOwner,

    /// The OS refused the call.  Safe to retry on the next signal.
    #[error("Platform rejected the request: {0}")]
    PlatformRejected(String),

    /// Any other failure.  Safe to retry on the next signal.
    #[error("Unexpected lock-task failure: {0}")]
    Unexpected(String),
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LockError::NotOwner)
    }
}

/// Global error type spanning privilege, platform, signal, and channel
/// failures.  None of these are fatal to the agent.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KioskError {
    #[error("Privilege Error: {0}")]
    Privilege(String),

    #[error("Platform Error: {0}")]
    Platform(String),

    #[error("Signal Error: {0}")]
    Signal(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Event Bus Error: {0}")]
    Bus(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl From<LockError> for KioskError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::NotOwner => KioskError::Privilege(err.to_string()),
            LockError::PlatformRejected(_) | LockError::Unexpected(_) => {
                KioskError::Platform(err.to_string())
            }
        }
    }
}
