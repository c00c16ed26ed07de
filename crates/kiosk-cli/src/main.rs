//! `kioskd` – kiosk lock agent.
//!
//! 1. Loads `~/.kiosk/config.toml` (`kioskd --init` writes the defaults).
//! 2. Wires the simulated device policy service, the remote flag channel and
//!    the [`KioskAgent`].
//! 3. Drops the operator into a console with slash-commands (`/grant`,
//!    `/status`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to stop the agent cleanly.
//!
//! `--offline` swaps the WebSocket channel for an in-process store driven by
//! `/set`.

mod config;
mod console;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use kiosk_hal::{LockController, SimLockTask};
use kiosk_kernel::{PrivilegeGate, SimAdminRegistry};
use kiosk_middleware::{
    EventBus, MemoryChannel, RemoteChannel, RemoteFlagWatcher, Topic, WsRemoteChannel,
};
use kiosk_runtime::{AgentConfig, KioskAgent, Reconciler};
use kiosk_types::{AgentInput, DeviceIdentity};

use crate::config::Config;
use crate::console::{Console, StatusView};

/// Parsed command-line flags.
#[derive(Debug, Default, PartialEq)]
struct Options {
    offline: bool,
    init: bool,
    help: bool,
}

impl Options {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut opts = Options::default();
        for arg in args {
            match arg.as_str() {
                "--offline" => opts.offline = true,
                "--init" => opts.init = true,
                "-h" | "--help" => opts.help = true,
                other => return Err(format!("unknown argument '{other}'")),
            }
        }
        Ok(opts)
    }
}

fn main() -> ExitCode {
    let opts = match Options::parse(std::env::args().skip(1)) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            print_usage();
            return ExitCode::from(2);
        }
    };
    if opts.help {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if opts.init {
        return init_config();
    }

    let _guard = kiosk_runtime::init_tracing("kioskd");
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  {} No config at {}; using defaults. Run `{}` to create one.",
                "!".yellow().bold(),
                config::config_path().display().to_string().bold(),
                "kioskd --init".bold()
            );
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(config = ?cfg, offline = opts.offline, "starting kiosk agent");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg, opts.offline))
}

async fn run(cfg: Config, offline: bool) -> ExitCode {
    let bus = EventBus::default();
    let status = Arc::new(Mutex::new(StatusView::default()));
    let printer = tokio::spawn(console::print_events(
        bus.subscribe_to(Topic::Notices),
        bus.subscribe_to(Topic::StateChanges),
        Arc::clone(&status),
    ));

    // ── Simulated device policy service ───────────────────────────────────
    let admin = SimAdminRegistry::new();
    let device = SimLockTask::new(cfg.simulate_device_owner);
    let identity = cfg.identity();
    let gate = PrivilegeGate::new(Arc::new(admin.clone()), identity.component.clone());
    let controller = seeded_controller(&device, identity, bus.clone());

    // ── Agent ─────────────────────────────────────────────────────────────
    let agent_config = AgentConfig {
        grant_timeout: cfg.grant_timeout(),
        request_privilege_on_start: cfg.request_privilege_on_start,
        ..AgentConfig::default()
    };
    let (agent, handle) = KioskAgent::new(
        Reconciler::new(gate, controller, bus.clone()),
        bus.clone(),
        agent_config,
    );
    let agent_task = tokio::spawn(agent.run());

    // ── Remote flag ───────────────────────────────────────────────────────
    let (channel, memory): (Arc<dyn RemoteChannel>, Option<MemoryChannel>) = if offline {
        println!("  Remote channel: {}", "in-process (offline)".yellow());
        let memory = MemoryChannel::new();
        (Arc::new(memory.clone()), Some(memory))
    } else {
        println!("  Remote channel: {}", cfg.channel_url.bold());
        let ws = WsRemoteChannel::new(cfg.channel_url.clone())
            .with_token(cfg.channel_token.expose());
        (Arc::new(ws), None)
    };
    let subscription =
        RemoteFlagWatcher::new(channel, cfg.flag_path.clone()).subscribe(handle.sender());
    info!(path = subscription.path(), "kiosk flag subscription started");

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let ctrlc_handle = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the kiosk agent …".yellow().bold());
        if let Err(e) = ctrlc_handle.send_blocking(AgentInput::Shutdown) {
            eprintln!("{}: {}", "Shutdown failed".red(), e);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Operator console ──────────────────────────────────────────────────
    // stdin blocks, so the console lives on its own thread and is abandoned
    // when the agent stops for another reason.
    let offline_store = memory.map(|m| (m, cfg.flag_path.clone()));
    let console = Console::new(handle, admin, offline_store, Arc::clone(&status));
    std::thread::spawn(move || console.run());

    let code = match agent_task.await {
        Ok(reconciler) => {
            println!(
                "  {} Agent stopped (privilege: {}, lock: {}).",
                "✓".green().bold(),
                reconciler.gate().state(),
                reconciler
                    .controller()
                    .state()
                    .map_or_else(|| "unknown".to_string(), |s| s.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "agent task failed");
            ExitCode::FAILURE
        }
    };
    printer.abort();
    code
}

/// Controller whose cache starts from the device's observed pinning state,
/// so a first `false` on an unpinned device touches nothing.
fn seeded_controller(device: &SimLockTask, identity: DeviceIdentity, bus: EventBus) -> LockController {
    LockController::new(Arc::new(device.clone()), identity, bus).with_initial_state(device.state())
}

fn init_config() -> ExitCode {
    let path = config::config_path();
    match config::load() {
        Ok(Some(_)) => {
            println!("  Config already exists at {}", path.display().to_string().bold());
            return ExitCode::SUCCESS;
        }
        Ok(None) => {}
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    }
    match config::save(&Config::default()) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("Usage: kioskd [--offline] [--init]");
    println!();
    println!("  --offline   use an in-process flag store driven by /set");
    println!("  --init      write ~/.kiosk/config.toml with defaults and exit");
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "kioskd".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Remote-controlled screen pinning agent");
    println!();
}
