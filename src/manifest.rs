//! Configuration for cmdchk
//!
//! Settings come from several layers folded left to right, each layer only
//! overriding the keys it actually sets:
//! built-in defaults, programmatic defaults, JSON config files (in order),
//! and finally command-line arguments.

use crate::error::{Error, Result};
use crate::logging::LogDestination;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Port the server binds when nothing else is configured
pub const DEFAULT_PORT: u16 = 9200;

/// User the server drops to when started as root
pub const DEFAULT_USER: &str = "nobody";

/// The trivially-succeeding check used when no checks are configured
pub const DEFAULT_CHECK: &str = "/bin/true";

/// Config file read by the supervisor when none is given
pub const DAEMON_CONFIG: &str = "/etc/cmdchk.cfg";

/// Log file used by the supervised server unless configured otherwise
pub const DAEMON_LOG: &str = "/var/log/cmdchk/cmdchk.log";

/// A single check: a command line and the exit codes that count as success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    /// Executable path followed by its arguments
    pub command: String,
    /// Accepted exit codes; empty means only 0
    pub accepted_codes: BTreeSet<i32>,
}

impl CheckSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            accepted_codes: BTreeSet::new(),
        }
    }

    pub fn with_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.accepted_codes.extend(codes);
        self
    }

    /// Whether `code` counts as success for this check
    pub fn accepts(&self, code: i32) -> bool {
        if self.accepted_codes.is_empty() {
            code == 0
        } else {
            self.accepted_codes.contains(&code)
        }
    }
}

impl fmt::Display for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)
    }
}

/// One configuration layer; unset keys fall through to lower layers
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialSettings {
    pub user: Option<String>,

    pub port: Option<u16>,

    pub log_location: Option<String>,

    /// Checks keyed by command, in document order
    #[serde(default, alias = "check_list", deserialize_with = "ordered_checks")]
    pub checks: Option<Vec<CheckSpec>>,
}

impl PartialSettings {
    /// The built-in defaults, the bottom layer of every fold
    pub fn builtin() -> Self {
        Self {
            user: Some(DEFAULT_USER.to_string()),
            port: Some(DEFAULT_PORT),
            log_location: Some(String::new()),
            checks: Some(vec![CheckSpec::new(DEFAULT_CHECK)]),
        }
    }

    /// Merge another layer on top of this one (other overrides self)
    pub fn merge(self, other: PartialSettings) -> PartialSettings {
        PartialSettings {
            user: other.user.or(self.user),
            port: other.port.or(self.port),
            log_location: other.log_location.or(self.log_location),
            checks: other.checks.or(self.checks),
        }
    }

    /// Parse one JSON config document
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// Deserialize a `{"command": [codes]}` object while keeping document order
fn ordered_checks<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<CheckSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ChecksVisitor;

    impl<'de> Visitor<'de> for ChecksVisitor {
        type Value = Vec<CheckSpec>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of check commands to lists of accepted exit codes")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut checks: Vec<CheckSpec> = Vec::new();
            while let Some((command, codes)) = map.next_entry::<String, Option<Vec<i32>>>()? {
                let spec = CheckSpec::new(command).with_codes(codes.unwrap_or_default());
                upsert_check(&mut checks, spec);
            }
            Ok(checks)
        }
    }

    deserializer.deserialize_map(ChecksVisitor).map(Some)
}

/// Insert a check, replacing an earlier entry for the same command in place
pub fn upsert_check(checks: &mut Vec<CheckSpec>, spec: CheckSpec) {
    if let Some(existing) = checks.iter_mut().find(|c| c.command == spec.command) {
        *existing = spec;
    } else {
        checks.push(spec);
    }
}

/// Fully resolved settings consumed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub user: String,
    pub port: u16,
    pub log_location: LogDestination,
    pub checks: Vec<CheckSpec>,
}

impl Settings {
    /// Fold layers over the built-in defaults, later layers winning
    pub fn resolve(layers: impl IntoIterator<Item = PartialSettings>) -> Settings {
        let merged = layers
            .into_iter()
            .fold(PartialSettings::builtin(), PartialSettings::merge);

        Settings {
            user: merged.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            port: merged.port.unwrap_or(DEFAULT_PORT),
            log_location: LogDestination::parse(merged.log_location.as_deref().unwrap_or("")),
            checks: merged.checks.unwrap_or_default(),
        }
    }
}

/// Where a server's configuration comes from
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Command-line arguments, the highest layer
    pub overrides: PartialSettings,
    /// Programmatic defaults, just above the built-in ones
    pub defaults: PartialSettings,
    /// JSON files, read in order
    pub files: Vec<PathBuf>,
}

/// Outcome of reading the config files, with notes for the startup log
#[derive(Debug, Default)]
pub struct FileLayers {
    pub layers: Vec<PartialSettings>,
    pub notes: Vec<String>,
}

/// Read config files in order
///
/// Files that cannot be opened are skipped with a note; a file that cannot
/// be parsed aborts the whole load.
pub fn read_files(paths: &[PathBuf]) -> Result<FileLayers> {
    let mut result = FileLayers::default();
    let mut read = Vec::new();

    for path in paths {
        match read_file(path) {
            Ok(layer) => {
                result.layers.push(layer);
                read.push(path.display().to_string());
            }
            Err(Error::ConfigRead { source, .. })
                if source.kind() != io::ErrorKind::InvalidData =>
            {
                result
                    .notes
                    .push(format!("Could not open file: {} ({})", path.display(), source));
            }
            Err(e) => return Err(e),
        }
    }

    if read.is_empty() {
        result
            .notes
            .push("No config files read. Using defaults.".to_string());
    } else {
        result
            .notes
            .push(format!("Read config files: {}", read.join(", ")));
    }

    Ok(result)
}

fn read_file(path: &Path) -> Result<PartialSettings> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    PartialSettings::from_json(&content).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Resolve the final settings for a server
pub fn load(sources: &ConfigSources) -> Result<(Settings, Vec<String>)> {
    let files = read_files(&sources.files)?;

    let layers = std::iter::once(sources.defaults.clone())
        .chain(files.layers)
        .chain(std::iter::once(sources.overrides.clone()));

    Ok((Settings::resolve(layers), files.notes))
}
