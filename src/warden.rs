//! The Warden - server supervisor
//!
//! Keeps exactly one server child alive:
//! - Respawns the child immediately when it exits on its own
//! - Rotates (terminate, reap, respawn) on request
//! - Terminates and reaps the child before shutting down
//!
//! Child exits and operator directives are serialized through a single
//! `select!` in [`Warden::run`], so a child is always reaped before the next
//! one is spawned.

pub mod lifecycle;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
#[cfg(test)]
use tokio::sync::watch;

use crate::error::{Error, Result};
use lifecycle::{Lifecycle, Step};
#[cfg(test)]
use lifecycle::ChildState;

/// Delay before retrying a child that could not be spawned
pub const RESPAWN_DELAY: Duration = Duration::from_secs(5);

/// Requests the Warden receives from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Stop the child and shut down
    Terminate,
    /// Replace the child with a fresh one
    Rotate,
}

/// Whatever woke the control loop
#[derive(Debug)]
enum WardenEvent {
    ChildExited(io::Result<ExitStatus>),
    Directive(Directive),
}

/// Snapshot of the supervised child
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildStatus {
    /// Number of children spawned so far
    pub generation: u64,
    /// Pid of the current child
    pub pid: Option<u32>,
    pub state: ChildState,
}

#[cfg(test)]
impl Default for ChildStatus {
    fn default() -> Self {
        Self {
            generation: 0,
            pid: None,
            state: ChildState::NoChild,
        }
    }
}

/// Program and arguments for the child
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ChildCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for ChildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The Warden supervises a single child process
pub struct Warden {
    command: ChildCommand,
    /// Channel to receive directives
    rx: mpsc::Receiver<Directive>,
    /// Sender for directives (cloneable)
    tx: mpsc::Sender<Directive>,
    lifecycle: Lifecycle,
    respawn_delay: Duration,
    #[cfg(test)]
    status: watch::Sender<ChildStatus>,
}

impl Warden {
    /// Create a new Warden for the given child command
    pub fn new(command: ChildCommand) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            command,
            rx,
            tx,
            lifecycle: Lifecycle::new(),
            respawn_delay: RESPAWN_DELAY,
            #[cfg(test)]
            status: watch::channel(ChildStatus::default()).0,
        }
    }

    /// Override the spawn retry delay
    #[cfg(test)]
    pub fn with_respawn_delay(mut self, delay: Duration) -> Self {
        self.respawn_delay = delay;
        self
    }

    /// Get a sender to direct the Warden
    pub fn sender(&self) -> mpsc::Sender<Directive> {
        self.tx.clone()
    }

    /// Watch the supervised child
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<ChildStatus> {
        self.status.subscribe()
    }

    /// Run the control loop until a Terminate directive
    pub async fn run(&mut self) -> Result<()> {
        info!("Supervisor started: {}", self.command);

        loop {
            // Directives that arrived while no child was running
            let mut shutdown = false;
            while let Ok(directive) = self.rx.try_recv() {
                match directive {
                    Directive::Terminate => shutdown = true,
                    Directive::Rotate => debug!("No child to rotate"),
                }
            }
            if shutdown {
                break;
            }

            let mut child = match self.spawn() {
                Ok(child) => child,
                Err(e) => {
                    error!("{}, retrying in {:?}", e, self.respawn_delay);
                    let shutdown = tokio::select! {
                        _ = tokio::time::sleep(self.respawn_delay) => false,
                        directive = self.rx.recv() => {
                            matches!(directive, Some(Directive::Terminate) | None)
                        }
                    };
                    if shutdown {
                        break;
                    }
                    continue;
                }
            };

            let event = tokio::select! {
                status = child.wait() => WardenEvent::ChildExited(status),
                directive = self.rx.recv() => {
                    WardenEvent::Directive(directive.unwrap_or(Directive::Terminate))
                }
            };

            match event {
                WardenEvent::ChildExited(status) => {
                    self.advance(Step::Reap, None)?;
                    match status {
                        Ok(status) => warn!("Child exited ({}), restarting", status),
                        Err(e) => warn!("Lost track of child: {}, restarting", e),
                    }
                }
                WardenEvent::Directive(Directive::Rotate) => {
                    info!("Rotating child");
                    self.stop(&mut child).await?;
                }
                WardenEvent::Directive(Directive::Terminate) => {
                    info!("Terminating child");
                    self.stop(&mut child).await?;
                    break;
                }
            }
        }

        info!("Supervisor stopped");
        Ok(())
    }

    fn spawn(&mut self) -> Result<Child> {
        self.advance(Step::Spawn, None)?;

        let spawned = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                let pid = child.id();
                self.advance(Step::Started, pid)?;
                info!("Started child {}", pid.unwrap_or_default());
                Ok(child)
            }
            Err(source) => {
                self.advance(Step::Abort, None)?;
                Err(Error::Spawn {
                    command: self.command.to_string(),
                    source,
                })
            }
        }
    }

    /// Send SIGTERM and wait for the child to be reaped
    async fn stop(&mut self, child: &mut Child) -> Result<()> {
        let pid = child.id();
        self.advance(Step::Terminate, pid)?;

        if let Some(pid) = pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Could not signal child {}: {}", pid, e);
            }
        }

        let status = child.wait().await?;
        self.advance(Step::Reap, None)?;
        info!("Child {} reaped ({})", pid.unwrap_or_default(), status);
        Ok(())
    }

    /// Apply a lifecycle step for the child `pid`
    fn advance(&mut self, step: Step, pid: Option<u32>) -> Result<()> {
        let state = self.lifecycle.step(step)?;
        debug!("Child {:?}: {:?} -> {:?}", pid, step, state);

        #[cfg(test)]
        self.status.send_modify(|s| {
            if step == Step::Started {
                s.generation += 1;
            }
            s.pid = pid;
            s.state = state;
        });

        Ok(())
    }
}

/// Turn process signals into directives
///
/// SIGTERM and SIGINT request termination, SIGUSR1 requests rotation.
pub fn forward_signals(tx: mpsc::Sender<Directive>) -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    tokio::spawn(async move {
        loop {
            let directive = tokio::select! {
                Some(()) = term.recv() => Directive::Terminate,
                Some(()) = interrupt.recv() => Directive::Terminate,
                Some(()) = usr1.recv() => Directive::Rotate,
                else => break,
            };
            debug!("Signal received: {:?}", directive);
            if tx.send(directive).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}
