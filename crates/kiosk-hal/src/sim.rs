//! In-process lock-task simulator for CI/CD testing without a device.
//!
//! [`SimLockTask`] records every platform call, tracks whether a task is
//! pinned, and can be told to fail the next call of a given kind.  Clones
//! share state.
//!
//! # Example
//!
//! ```rust
//! use kiosk_hal::sim::SimLockTask;
//! use kiosk_hal::LockTaskPlatform;
//! use kiosk_types::LockState;
//!
//! let sim = SimLockTask::new(true);
//! sim.set_lock_task_packages("pkg/.Admin", &["pkg".to_string()]).unwrap();
//! sim.start_lock_task().unwrap();
//! assert_eq!(sim.state(), LockState::Locked);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kiosk_types::LockState;

use crate::platform::{LockTaskPlatform, PlatformFault};

/// Kinds of platform call the simulator records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    IsDeviceOwnerApp,
    SetLockTaskPackages,
    StartLockTask,
    StopLockTask,
}

#[derive(Default)]
struct SimDevice {
    owner: bool,
    pinned: bool,
    packages: Vec<String>,
    calls: Vec<SimCall>,
    faults: HashMap<SimCall, PlatformFault>,
}

/// A simulated device-policy service.  Starts unpinned.
#[derive(Clone)]
pub struct SimLockTask {
    device: Arc<Mutex<SimDevice>>,
}

impl SimLockTask {
    /// `owner` decides whether this app is the device owner.
    pub fn new(owner: bool) -> Self {
        Self {
            device: Arc::new(Mutex::new(SimDevice {
                owner,
                ..SimDevice::default()
            })),
        }
    }

    pub fn set_device_owner(&self, owner: bool) {
        self.with(|d| d.owner = owner);
    }

    /// Whether a task is currently pinned.
    pub fn state(&self) -> LockState {
        self.with(|d| {
            if d.pinned {
                LockState::Locked
            } else {
                LockState::Unlocked
            }
        })
    }

    /// Current lock-task allow-list.
    pub fn packages(&self) -> Vec<String> {
        self.with(|d| d.packages.clone())
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.with(|d| d.calls.clone())
    }

    /// Number of calls of `kind` made so far.
    pub fn count(&self, kind: SimCall) -> usize {
        self.with(|d| d.calls.iter().filter(|c| **c == kind).count())
    }

    /// Make the next call of `kind` fail with `fault`.
    pub fn fail_next(&self, kind: SimCall, fault: PlatformFault) {
        self.with(|d| {
            d.faults.insert(kind, fault);
        });
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let mut device = self.device.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut device)
    }

    fn record(&self, kind: SimCall) -> Result<(), PlatformFault> {
        self.with(|d| {
            d.calls.push(kind);
            d.faults.remove(&kind).map_or(Ok(()), Err)
        })
    }
}

impl LockTaskPlatform for SimLockTask {
    fn is_device_owner_app(&self, _package: &str) -> Result<bool, PlatformFault> {
        self.record(SimCall::IsDeviceOwnerApp)?;
        Ok(self.with(|d| d.owner))
    }

    fn set_lock_task_packages(
        &self,
        _component: &str,
        packages: &[String],
    ) -> Result<(), PlatformFault> {
        self.record(SimCall::SetLockTaskPackages)?;
        self.with(|d| d.packages = packages.to_vec());
        Ok(())
    }

    fn start_lock_task(&self) -> Result<(), PlatformFault> {
        self.record(SimCall::StartLockTask)?;
        self.with(|d| {
            if !d.owner {
                return Err(PlatformFault::Security("caller is not the device owner".into()));
            }
            if d.packages.is_empty() {
                return Err(PlatformFault::Security("package is not in the lock task allow-list".into()));
            }
            d.pinned = true;
            Ok(())
        })
    }

    fn stop_lock_task(&self) -> Result<(), PlatformFault> {
        self.record(SimCall::StopLockTask)?;
        self.with(|d| d.pinned = false);
        Ok(())
    }
}
