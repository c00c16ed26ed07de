//! In-process admin registry for CI/CD testing without a managed device.
//!
//! [`SimAdminRegistry`] records every grant-dialog launch and lets the
//! caller decide whether the component is an active admin.  Clones share
//! state, so a test can keep one handle while the gate owns another.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kiosk_types::KioskError;

use crate::privilege_gate::AdminRegistry;

#[derive(Default)]
struct Inner {
    active: AtomicBool,
    requests: AtomicUsize,
    last_explanation: Mutex<Option<String>>,
    request_failure: Mutex<Option<String>>,
}

/// Simulated device-policy admin registry.  Starts with the admin inactive.
#[derive(Clone, Default)]
pub struct SimAdminRegistry {
    inner: Arc<Inner>,
}

impl SimAdminRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the component as an active (or inactive) admin.
    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::SeqCst);
    }

    /// Make subsequent dialog launches fail with `reason`; `None` restores
    /// normal behaviour.
    pub fn set_request_failure(&self, reason: Option<&str>) {
        let mut slot = self
            .inner
            .request_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = reason.map(str::to_string);
    }

    /// Number of successful dialog launches.
    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    /// Explanation passed to the most recent dialog launch.
    pub fn last_explanation(&self) -> Option<String> {
        self.inner
            .last_explanation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AdminRegistry for SimAdminRegistry {
    fn is_admin_active(&self, _component: &str) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn request_admin(&self, component: &str, explanation: &str) -> Result<(), KioskError> {
        let failure = self
            .inner
            .request_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(reason) = failure {
            return Err(KioskError::Privilege(format!(
                "cannot request admin for {component}: {reason}"
            )));
        }
        self.inner.requests.fetch_add(1, Ordering::SeqCst);
        *self
            .inner
            .last_explanation
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(explanation.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = SimAdminRegistry::new();
        let b = a.clone();
        a.set_active(true);
        assert!(b.is_admin_active("any"));
        b.request_admin("any", "why").unwrap();
        assert_eq!(a.request_count(), 1);
    }

    #[test]
    fn request_failure_is_reported_and_not_counted() {
        let reg = SimAdminRegistry::new();
        reg.set_request_failure(Some("blocked"));
        assert!(reg.request_admin("pkg/.Admin", "why").is_err());
        assert_eq!(reg.request_count(), 0);

        reg.set_request_failure(None);
        assert!(reg.request_admin("pkg/.Admin", "why").is_ok());
        assert_eq!(reg.request_count(), 1);
    }
}
