//! Remote flag → watcher → agent → simulated device, wired the way `kioskd`
//! wires them.

use std::sync::Arc;
use std::time::Duration;

use kiosk_hal::{LockController, SimCall, SimLockTask};
use kiosk_kernel::{PrivilegeGate, SimAdminRegistry};
use kiosk_middleware::{EventBus, MemoryChannel, RemoteFlagWatcher, Topic, TopicReceiver};
use kiosk_runtime::{AgentConfig, AgentHandle, KioskAgent, Reconciler};
use kiosk_types::{DeviceIdentity, EventPayload, LockState, PrivilegeState};
use serde_json::json;
use tokio::task::JoinHandle;

const PATH: &str = "kiosk_mode";

struct Harness {
    admin: SimAdminRegistry,
    device: SimLockTask,
    channel: MemoryChannel,
    notices: TopicReceiver,
    seen: Vec<String>,
    handle: AgentHandle,
    agent: JoinHandle<Reconciler>,
}

impl Harness {
    /// Whether any notice so far satisfies `pred`.
    fn saw(&mut self, pred: impl Fn(&str) -> bool) -> bool {
        self.seen.extend(self.notices.drain().into_iter().filter_map(|e| match e.payload {
            EventPayload::Notice(n) => Some(n.message),
            _ => None,
        }));
        self.seen.iter().any(|m| pred(m))
    }

    /// Wait for the watcher's first delivery, which proves it is subscribed.
    async fn ready(&mut self) {
        eventually("initial delivery", || {
            self.saw(|m| m == "Invalid kiosk mode value (value is absent).")
        })
        .await;
    }

    async fn stop(self) -> Reconciler {
        self.handle.shutdown().await.unwrap();
        self.agent.await.unwrap()
    }
}

fn launch(admin_active: bool) -> Harness {
    let admin = SimAdminRegistry::new();
    admin.set_active(admin_active);
    let device = SimLockTask::new(true);
    let channel = MemoryChannel::new();
    let bus = EventBus::default();
    let notices = bus.subscribe_to(Topic::Notices);

    let identity = DeviceIdentity::new("com.example.crew/.KioskAdminReceiver", "com.example.crew");
    let gate = PrivilegeGate::new(Arc::new(admin.clone()), identity.component.clone());
    let controller = LockController::new(Arc::new(device.clone()), identity, bus.clone());
    let config = AgentConfig {
        grant_timeout: None,
        ..AgentConfig::default()
    };
    let (agent, handle) = KioskAgent::new(Reconciler::new(gate, controller, bus.clone()), bus, config);
    let agent = tokio::spawn(agent.run());
    RemoteFlagWatcher::new(Arc::new(channel.clone()), PATH).subscribe(handle.sender());

    Harness {
        admin,
        device,
        channel,
        notices,
        seen: Vec::new(),
        handle,
        agent,
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn null_true_true_false_sequence() {
    let mut h = launch(true);
    h.ready().await;
    assert!(h.device.calls().is_empty());

    h.channel.set(PATH, json!(true));
    eventually("lock", || h.device.state() == LockState::Locked).await;
    assert_eq!(h.device.packages(), vec!["com.example.crew".to_string()]);

    h.channel.set(PATH, json!(true));
    eventually("repeat notice", || h.saw(|m| m == "Screen pinning already enabled.")).await;
    assert_eq!(h.device.count(SimCall::StartLockTask), 1);

    h.channel.set(PATH, json!(false));
    eventually("unlock", || h.device.state() == LockState::Unlocked).await;
    assert!(h.device.packages().is_empty());
    assert_eq!(h.device.count(SimCall::StopLockTask), 1);

    let reconciler = h.stop().await;
    assert_eq!(reconciler.controller().state(), Some(LockState::Unlocked));
}

#[tokio::test]
async fn malformed_values_never_reach_the_device() {
    let mut h = launch(true);
    let device = h.device.clone();
    h.ready().await;

    h.channel.set(PATH, json!("yes"));
    h.channel.set(PATH, json!(1));
    h.channel.set(PATH, json!(null));
    eventually("invalid number notice", || {
        h.saw(|m| m == "Invalid kiosk mode value (expected a boolean, got number).")
    })
    .await;
    assert!(h.saw(|m| m.contains("got string")));

    h.stop().await;
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn denied_then_locked_stays_unpinned_until_granted() {
    let mut h = launch(false);
    h.handle.grant_result(false).await.unwrap();
    h.channel.set(PATH, json!(true));

    eventually("privilege warning", || h.saw(|m| m.starts_with("Privilege required"))).await;
    assert!(h.saw(|m| m == "Admin permissions not granted. Please try again."));
    assert_eq!(h.device.state(), LockState::Unlocked);
    assert_eq!(h.device.count(SimCall::StartLockTask), 0);

    h.handle.request_privilege().await.unwrap();
    h.admin.set_active(true);
    h.handle.grant_result(true).await.unwrap();
    eventually("lock after grant", || h.device.state() == LockState::Locked).await;

    let reconciler = h.stop().await;
    assert_eq!(reconciler.gate().state(), PrivilegeState::Granted);
    assert_eq!(reconciler.gate().attempt(), 2);
}

#[tokio::test]
async fn channel_failure_without_prior_value_changes_nothing() {
    let mut h = launch(true);
    h.ready().await;

    h.channel.fail(PATH, "permission denied");
    eventually("fault notice", || {
        h.saw(|m| m == "Failed to read kiosk mode: permission denied")
    })
    .await;
    assert!(h.device.calls().is_empty());

    // The subscription survives the fault.
    h.channel.set(PATH, json!(true));
    eventually("lock after fault", || h.device.state() == LockState::Locked).await;

    h.stop().await;
}
