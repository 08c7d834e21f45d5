//! cmdchk - command-backed HTTP health checks
//!
//! Answers HTTP health checks by running a list of local check commands, and can
//! supervise its own server process.

mod cli;
mod error;
mod logging;
mod manifest;
mod server;
mod sickbay;
mod warden;

use cli::{Cli, Commands};
use error::Result;
use logging::LogDestination;

/// Held by tests that deliver real signals to the test process
#[cfg(test)]
fn signal_lock() -> std::sync::MutexGuard<'static, ()> {
    static SIGNAL_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    SIGNAL_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
        }

        Commands::Serve(args) => {
            let sources = args.sources()?;
            let rt = tokio::runtime::Runtime::new()?;

            // Errors were already logged to the configured destination
            if rt.block_on(server::run(sources)).is_err() {
                std::process::exit(1);
            }
        }

        Commands::Supervise(args) => {
            let args = args.with_daemon_defaults();
            // Reject bad options here rather than in every child
            args.sources()?;

            logging::install(&LogDestination::Console)?;
            let command = warden::ChildCommand::new(std::env::current_exe()?, args.to_argv());

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let mut warden = warden::Warden::new(command);
                warden::forward_signals(warden.sender())?;
                warden.run().await
            })?;
        }
    }

    Ok(())
}
