//! Server startup state machine
//!
//! Startup walks Initializing → PrivilegeCheck → LogSetup → Listening → Serving.
//! Any step can fail into FailedStartup, which is terminal.

use crate::error::Error;
use crate::logging::{self, LogDestination};
use crate::manifest::{self, ConfigSources, Settings};
use crate::server::privileges;
use log::{debug, error};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;

use state_machines::state_machine;

state_machine! {
    name: StartupMachine,
    dynamic: true,
    initial: Initializing,
    states: [Initializing, PrivilegeCheck, LogSetup, Listening, Serving, FailedStartup],
    events {
        authorize {
            transition: { from: Initializing, to: PrivilegeCheck }
        }
        configure {
            transition: { from: PrivilegeCheck, to: LogSetup }
        }
        bind {
            transition: { from: LogSetup, to: Listening }
        }
        serve {
            transition: { from: Listening, to: Serving }
        }
        fail {
            transition: {
                from: [Initializing, PrivilegeCheck, LogSetup, Listening],
                to: FailedStartup
            }
        }
    }
}

/// Startup phase as a plain enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    PrivilegeCheck,
    LogSetup,
    Listening,
    Serving,
    FailedStartup,
}

impl Phase {
    /// Parse phase from its state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "PrivilegeCheck" => Phase::PrivilegeCheck,
            "LogSetup" => Phase::LogSetup,
            "Listening" => Phase::Listening,
            "Serving" => Phase::Serving,
            "FailedStartup" => Phase::FailedStartup,
            _ => Phase::Initializing,
        }
    }
}

/// A bound listener with the settings it was started from
#[derive(Debug)]
pub struct Ready {
    pub listener: TcpListener,
    pub settings: Settings,
}

/// Drives one server through its startup sequence
pub struct Startup {
    machine: DynamicStartupMachine<()>,
    settings: Option<Settings>,
    notes: Vec<String>,
    logging: bool,
}

impl Default for Startup {
    fn default() -> Self {
        Self::new()
    }
}

impl Startup {
    pub fn new() -> Self {
        Self {
            machine: StartupMachine::new(()).into_dynamic(),
            settings: None,
            notes: vec!["Server started.".to_string()],
            logging: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        Phase::from_name(self.machine.current_state())
    }

    fn advance(&mut self, event: StartupMachineEvent) -> crate::error::Result<()> {
        self.machine
            .handle(event)
            .map_err(|e| Error::Startup(format!("from {:?}: {:?}", self.phase(), e)))
    }

    /// Load config, drop privileges, open the log and bind the port
    pub async fn run(&mut self, sources: &ConfigSources) -> crate::error::Result<Ready> {
        let (settings, notes) = manifest::load(sources)?;
        self.notes.extend(notes);
        self.settings = Some(settings.clone());

        self.advance(StartupMachineEvent::Authorize)?;
        let change = privileges::drop_to(&settings.user)?;
        self.notes.push(change.to_string());

        self.advance(StartupMachineEvent::Configure)?;
        logging::install(&settings.log_location)?;
        self.logging = true;
        for note in self.notes.drain(..) {
            debug!("{}", note);
        }

        self.advance(StartupMachineEvent::Bind)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            port: settings.port,
            source,
        })?;

        Ok(Ready { listener, settings })
    }

    /// Enter the Serving phase
    pub fn serving(&mut self) -> crate::error::Result<()> {
        self.advance(StartupMachineEvent::Serve)
    }

    /// Enter FailedStartup and report why
    ///
    /// If logging was not set up yet, the configured destination is tried,
    /// then the console.
    pub fn fail(&mut self, err: &Error) {
        if let Err(e) = self.advance(StartupMachineEvent::Fail) {
            debug!("{}", e);
        }

        if !self.logging {
            let destination = self
                .settings
                .as_ref()
                .map(|s| s.log_location.clone())
                .unwrap_or(LogDestination::Console);
            if logging::install(&destination).is_err() {
                let _ = logging::install(&LogDestination::Console);
            }
            self.logging = true;
        }

        for note in self.notes.drain(..) {
            debug!("{}", note);
        }
        error!("{}", err);
    }
}
