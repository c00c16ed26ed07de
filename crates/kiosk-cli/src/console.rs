//! Operator console for `kioskd`.
//!
//! Supported slash-commands:
//!   /grant        – approve the pending admin-permission dialog
//!   /deny         – reject the pending admin-permission dialog
//!   /request      – open the admin-permission dialog again
//!   /status       – show privilege and lock state
//!   /set <value>  – write `true`, `false` or `null` to the flag (offline only)
//!   /help         – show this list
//!   /quit | /exit – stop the agent and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use kiosk_kernel::SimAdminRegistry;
use kiosk_middleware::{MemoryChannel, TopicReceiver};
use kiosk_runtime::AgentHandle;
use kiosk_types::{AgentInput, Event, EventPayload, LockState, Notice, PrivilegeState, Severity};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Grant,
    Deny,
    Request,
    Status,
    /// `None` clears the flag.
    Set(Option<bool>),
    Help,
    Quit,
    /// A known command with bad arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse a console line.  Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let head = words.next()?;
        let arg = words.next();
        let single = words.next().is_none();
        let cmd = match (head, arg) {
            ("/grant", None) => Command::Grant,
            ("/deny", None) => Command::Deny,
            ("/request", None) => Command::Request,
            ("/status", None) => Command::Status,
            ("/help", None) => Command::Help,
            ("/quit" | "/exit", None) => Command::Quit,
            ("/set", Some("true")) if single => Command::Set(Some(true)),
            ("/set", Some("false")) if single => Command::Set(Some(false)),
            ("/set", Some("null")) if single => Command::Set(None),
            ("/set", _) => Command::Usage("/set true|false|null"),
            _ => Command::Unknown(line.trim().to_string()),
        };
        Some(cmd)
    }
}

/// What the console knows about the agent, folded from bus events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusView {
    pub privilege: PrivilegeState,
    pub lock: Option<LockState>,
    pub last_notice: Option<String>,
}

impl StatusView {
    pub fn apply(&mut self, event: &Event) {
        match &event.payload {
            EventPayload::PrivilegeChanged(state) => self.privilege = *state,
            EventPayload::LockStateChanged(state) => self.lock = Some(*state),
            EventPayload::Notice(notice) => self.last_notice = Some(notice.message.clone()),
        }
    }
}

/// Print notices as they arrive and keep `status` current.  Returns once the
/// bus is gone.
pub async fn print_events(
    mut notices: TopicReceiver,
    mut changes: TopicReceiver,
    status: Arc<Mutex<StatusView>>,
) {
    loop {
        let event = tokio::select! {
            r = notices.recv() => r,
            r = changes.recv() => r,
        };
        match event {
            Ok(event) => {
                if let EventPayload::Notice(notice) = &event.payload {
                    println!("  {}", render_notice(notice));
                }
                status.lock().unwrap_or_else(|e| e.into_inner()).apply(&event);
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

fn render_notice(notice: &Notice) -> String {
    match notice.severity {
        Severity::Info => format!("{} {}", "•".green(), notice.message),
        Severity::Warning => format!("{} {}", "!".yellow().bold(), notice.message.yellow()),
        Severity::Error => format!("{} {}", "✗".red().bold(), notice.message.red()),
    }
}

/// Reads commands from stdin and forwards them to the agent.
pub struct Console {
    handle: AgentHandle,
    admin: SimAdminRegistry,
    /// Present in offline mode: the in-process flag store and the watched path.
    offline: Option<(MemoryChannel, String)>,
    status: Arc<Mutex<StatusView>>,
}

impl Console {
    pub fn new(
        handle: AgentHandle,
        admin: SimAdminRegistry,
        offline: Option<(MemoryChannel, String)>,
        status: Arc<Mutex<StatusView>>,
    ) -> Self {
        Self {
            handle,
            admin,
            offline,
            status,
        }
    }

    /// Blocking stdin loop.  Ends on `/quit` or EOF; either way the agent is
    /// asked to shut down.
    pub fn run(&self) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{} ", "kiosk>".bold().cyan());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }

            let Some(cmd) = Command::parse(&line) else {
                continue;
            };
            if self.execute(cmd).is_break() {
                return;
            }
        }
        self.send(AgentInput::Shutdown);
    }

    /// Carry out one command.  `Break` means the console should stop.
    pub fn execute(&self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::Grant => {
                self.admin.set_active(true);
                self.send(AgentInput::GrantResult(true));
            }
            Command::Deny => self.send(AgentInput::GrantResult(false)),
            Command::Request => self.send(AgentInput::RequestPrivilege),
            Command::Status => self.print_status(),
            Command::Set(value) => self.set_flag(value),
            Command::Help => print_help(self.offline.is_some()),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                self.send(AgentInput::Shutdown);
                return ControlFlow::Break(());
            }
            Command::Usage(usage) => println!("{} {}", "Usage:".yellow(), usage.bold()),
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
        ControlFlow::Continue(())
    }

    pub fn status(&self) -> StatusView {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn send(&self, input: AgentInput) {
        if let Err(e) = self.handle.send_blocking(input) {
            println!("{}: {}", "Agent unavailable".red(), e);
        }
    }

    fn set_flag(&self, value: Option<bool>) {
        let Some((channel, path)) = &self.offline else {
            println!(
                "{} /set is only available with {}",
                "!".yellow().bold(),
                "--offline".bold()
            );
            return;
        };
        match value {
            Some(v) => channel.set(path, Value::Bool(v)),
            None => channel.clear(path),
        }
    }

    fn print_status(&self) {
        let status = self.status();
        let lock = status
            .lock
            .map_or_else(|| "unknown".dimmed().to_string(), |s| s.to_string().bold().to_string());
        println!("{}", "Kiosk Status".bold().underline());
        println!("  Privilege : {}", status.privilege.to_string().yellow());
        println!("  Lock      : {lock}");
        if let Some((channel, path)) = &self.offline {
            let value = channel
                .get(path)
                .map_or_else(|| "absent".to_string(), |v| v.to_string());
            println!("  Flag      : {} = {}", path.bold(), value);
        }
        if let Some(notice) = status.last_notice {
            println!("  Last      : {}", notice.dimmed());
        }
    }
}

fn print_help(offline: bool) {
    println!();
    println!("{}", "Kiosk Commands".bold().underline());
    println!("  {}     – approve the admin-permission dialog", "/grant".bold().cyan());
    println!("  {}      – reject the admin-permission dialog", "/deny".bold().cyan());
    println!("  {}   – ask for admin permissions again", "/request".bold().cyan());
    println!("  {}    – show privilege and lock state", "/status".bold().cyan());
    if offline {
        println!("  {} – write the kiosk flag", "/set true|false|null".bold().cyan());
    }
    println!("  {} – stop the agent and exit", "/quit  /exit".bold().cyan());
    println!();
}
