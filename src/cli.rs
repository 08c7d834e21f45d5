//! Command-line interface for cmdchk
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::manifest::{self, CheckSpec, ConfigSources, PartialSettings};

/// cmdchk - answer HTTP health requests by running local check commands
#[derive(Parser)]
#[command(name = "cmdchk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the health check server in the foreground
    Serve(ServeArgs),

    /// Keep one server running; SIGUSR1 restarts it, SIGTERM stops both
    Supervise(ServeArgs),

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options shared by `serve` and `supervise`
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeArgs {
    /// User to switch to when started as root
    #[arg(short, long)]
    pub user: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log destination: stderr, syslog, or a file path
    #[arg(short = 'l', long = "log", value_name = "PATH")]
    pub log_location: Option<String>,

    /// JSON config files, later files override earlier ones
    #[arg(short, long, value_name = "FILE", num_args = 1..)]
    pub config: Vec<PathBuf>,

    /// Check command followed by its accepted exit codes (repeatable)
    #[arg(
        short = 'k',
        long = "check",
        value_names = ["CHECK", "RETURN"],
        num_args = 1..,
        action = ArgAction::Append,
        allow_negative_numbers = true
    )]
    pub checks: Vec<String>,

    /// Log destination used when neither config nor --log sets one
    #[arg(long, hide = true, value_name = "PATH")]
    pub default_log: Option<String>,
}

impl ServeArgs {
    /// Group `-k` tokens into checks
    ///
    /// Integer tokens are accepted codes of the command before them.
    pub fn check_specs(&self) -> Result<Vec<CheckSpec>> {
        let mut parsed: Vec<CheckSpec> = Vec::new();

        for token in &self.checks {
            match token.parse::<i32>() {
                Ok(code) => match parsed.last_mut() {
                    Some(spec) => {
                        spec.accepted_codes.insert(code);
                    }
                    None => {
                        return Err(Error::ConfigValidation(format!(
                            "return code {} given before any check command",
                            code
                        )));
                    }
                },
                Err(_) => parsed.push(CheckSpec::new(token.as_str())),
            }
        }

        let mut checks = Vec::with_capacity(parsed.len());
        for spec in parsed {
            manifest::upsert_check(&mut checks, spec);
        }
        Ok(checks)
    }

    /// Configuration layers these options describe
    pub fn sources(&self) -> Result<ConfigSources> {
        let checks = self.check_specs()?;

        Ok(ConfigSources {
            overrides: PartialSettings {
                user: self.user.clone(),
                port: self.port,
                log_location: self.log_location.clone(),
                checks: (!checks.is_empty()).then_some(checks),
            },
            defaults: PartialSettings {
                log_location: self.default_log.clone(),
                ..Default::default()
            },
            files: self.config.clone(),
        })
    }

    /// Apply the daemon defaults used under `supervise`
    pub fn with_daemon_defaults(mut self) -> Self {
        if self.config.is_empty() {
            self.config.push(PathBuf::from(manifest::DAEMON_CONFIG));
        }
        if self.default_log.is_none() {
            self.default_log = Some(manifest::DAEMON_LOG.to_string());
        }
        self
    }

    /// Render back into `serve` arguments
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec!["serve".to_string()];

        if let Some(user) = &self.user {
            argv.extend(["--user".to_string(), user.clone()]);
        }
        if let Some(port) = self.port {
            argv.extend(["--port".to_string(), port.to_string()]);
        }
        if let Some(log) = &self.log_location {
            argv.extend(["--log".to_string(), log.clone()]);
        }
        if !self.config.is_empty() {
            argv.push("--config".to_string());
            argv.extend(self.config.iter().map(|p| p.display().to_string()));
        }
        for token in &self.checks {
            if token.parse::<i32>().is_ok() {
                argv.push(token.clone());
            } else {
                argv.extend(["--check".to_string(), token.clone()]);
            }
        }
        if let Some(log) = &self.default_log {
            argv.extend(["--default-log".to_string(), log.clone()]);
        }

        argv
    }
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "cmdchk", &mut std::io::stdout());
    }
}
