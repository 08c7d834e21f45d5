//! Log sinks for the `log` facade
//!
//! The server logs to the console, a file, or syslog's daemon facility.
//! A file that cannot be opened falls back to syslog, and the failure is
//! reported there. Log files roll over at midnight UTC.

use crate::error::{Error, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::ffi::{CStr, CString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};
use time::{Date, OffsetDateTime};
use time::macros::format_description;

const SYSLOG_IDENT: &CStr = c"cmdchk";

/// Rotated log files kept next to the live one
const KEEP_ROTATED: usize = 6;

/// Where log records go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// stderr
    Console,
    /// syslog, daemon facility
    Syslog,
    /// Appended to a file
    File(PathBuf),
}

impl LogDestination {
    /// Interpret a configured `log_location`
    pub fn parse(location: &str) -> Self {
        match location.trim() {
            "" | "stderr" | "console" => LogDestination::Console,
            "syslog" => LogDestination::Syslog,
            path => LogDestination::File(PathBuf::from(path)),
        }
    }
}

impl std::fmt::Display for LogDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogDestination::Console => write!(f, "console"),
            LogDestination::Syslog => write!(f, "syslog"),
            LogDestination::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// An opened log sink
#[derive(Debug)]
enum Sink {
    Console,
    Syslog,
    File(Mutex<RotatingFile>),
}

impl Sink {
    fn open(destination: &LogDestination) -> io::Result<Self> {
        match destination {
            LogDestination::Console => Ok(Sink::Console),
            LogDestination::Syslog => Ok(Sink::syslog()),
            LogDestination::File(path) => {
                RotatingFile::open(path).map(|file| Sink::File(Mutex::new(file)))
            }
        }
    }

    fn syslog() -> Self {
        // SAFETY: the ident is a 'static C string, as openlog keeps the pointer.
        unsafe {
            libc::openlog(SYSLOG_IDENT.as_ptr(), libc::LOG_PID, libc::LOG_DAEMON);
        }
        Sink::Syslog
    }

    fn emit(&self, level: Level, message: &str) -> io::Result<()> {
        match self {
            Sink::Console => {
                let line = format_line(level, message);
                io::stderr().lock().write_all(line.as_bytes())
            }
            Sink::File(file) => {
                let line = format_line(level, message);
                file.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .write_line(&line, today())
            }
            Sink::Syslog => {
                let message = CString::new(message.replace('\0', ""))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                // SAFETY: both pointers are valid NUL-terminated strings and the
                // format consumes exactly one string argument.
                unsafe {
                    libc::syslog(
                        libc::LOG_DAEMON | syslog_priority(level),
                        c"%s".as_ptr(),
                        message.as_ptr(),
                    );
                }
                Ok(())
            }
        }
    }
}

/// A log file that rolls over when the UTC date changes
///
/// The finished day is renamed to `<name>.YYYY-MM-DD` and only the newest
/// [`KEEP_ROTATED`] of those are kept.
#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    file: File,
    /// Day the live file belongs to
    day: Date,
}

impl RotatingFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let day = file
            .metadata()
            .and_then(|m| m.modified())
            .map(|modified| OffsetDateTime::from(modified).date())
            .unwrap_or_else(|_| today());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            day,
        })
    }

    fn write_line(&mut self, line: &str, today: Date) -> io::Result<()> {
        if today > self.day {
            self.rotate(today)?;
        }
        self.file.write_all(line.as_bytes())
    }

    fn rotate(&mut self, today: Date) -> io::Result<()> {
        let rotated = rotated_path(&self.path, self.day)?;
        fs::rename(&self.path, &rotated)?;
        self.file = open_append(&self.path)?;
        self.day = today;
        self.prune()
    }

    /// Remove rotated files beyond the newest [`KEEP_ROTATED`]
    fn prune(&self) -> io::Result<()> {
        let Some(name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let prefix = format!("{}.", name);
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut rotated: Vec<(Date, PathBuf)> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                let suffix = file_name.strip_prefix(&prefix)?;
                let day = Date::parse(suffix, format_description!("[year]-[month]-[day]")).ok()?;
                Some((day, entry.path()))
            })
            .collect();

        rotated.sort();
        let excess = rotated.len().saturating_sub(KEEP_ROTATED);
        for (_, path) in rotated.drain(..excess) {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotated_path(path: &Path, day: Date) -> io::Result<PathBuf> {
    let suffix = day
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(io::Error::other)?;
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(PathBuf::from(name))
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn format_line(level: Level, message: &str) -> String {
    format!("{}: {}\n", level, message)
}

fn syslog_priority(level: Level) -> libc::c_int {
    match level {
        Level::Error => libc::LOG_ERR,
        Level::Warn => libc::LOG_WARNING,
        Level::Info => libc::LOG_INFO,
        Level::Debug | Level::Trace => libc::LOG_DEBUG,
    }
}

/// The process-wide logger; its sink can be swapped after registration
struct SinkLogger {
    sink: RwLock<Sink>,
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        // Nowhere left to report a failing sink
        let _ = sink.emit(record.level(), &record.args().to_string());
    }

    fn flush(&self) {
        let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        match &*sink {
            Sink::Console => {
                let _ = io::stderr().flush();
            }
            Sink::File(file) => {
                let _ = file.lock().unwrap_or_else(PoisonError::into_inner).file.flush();
            }
            Sink::Syslog => {}
        }
    }
}

static LOGGER: OnceLock<SinkLogger> = OnceLock::new();

/// Route all log records to `destination`
///
/// Falls back to syslog when a log file cannot be opened. Calling this again
/// replaces the active sink.
pub fn install(destination: &LogDestination) -> Result<()> {
    let (sink, open_failure) = open_or_syslog(destination);

    let mut registered = false;
    let logger = LOGGER.get_or_init(|| {
        registered = true;
        SinkLogger {
            sink: RwLock::new(Sink::Console),
        }
    });

    *logger.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;

    if registered {
        log::set_logger(logger).map_err(|e| Error::Logger(e.to_string()))?;
        log::set_max_level(LevelFilter::Debug);
    }

    if let Some(e) = open_failure {
        log::error!("Could not open logfile {}: {}", destination, e);
    }

    Ok(())
}

/// Open `destination`, or syslog together with the reason it could not be opened
fn open_or_syslog(destination: &LogDestination) -> (Sink, Option<io::Error>) {
    match Sink::open(destination) {
        Ok(sink) => (sink, None),
        Err(e) => (Sink::syslog(), Some(e)),
    }
}

/// Timestamp in the classic access-log layout, e.g. `19/Oct/2026 14:03:07`
pub fn access_timestamp() -> String {
    let format = format_description!("[day]/[month repr:short]/[year] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_destination() {
        assert_eq!(LogDestination::parse(""), LogDestination::Console);
        assert_eq!(LogDestination::parse("stderr"), LogDestination::Console);
        assert_eq!(LogDestination::parse("syslog"), LogDestination::Syslog);
        assert_eq!(
            LogDestination::parse("/var/log/cmdchk/cmdchk.log"),
            LogDestination::File(PathBuf::from("/var/log/cmdchk/cmdchk.log"))
        );
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmdchk.log");
        let destination = LogDestination::File(path.clone());

        let sink = Sink::open(&destination).unwrap();
        sink.emit(Level::Info, "Server started.").unwrap();
        sink.emit(Level::Warn, "/bin/false failed: exit code 1").unwrap();

        let reopened = Sink::open(&destination).unwrap();
        reopened.emit(Level::Debug, "again").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "INFO: Server started.\nWARN: /bin/false failed: exit code 1\nDEBUG: again\n"
        );
    }

    #[test]
    fn test_unopenable_file_is_an_error() {
        let destination = LogDestination::File(PathBuf::from("/nonexistent/dir/cmdchk.log"));
        assert!(Sink::open(&destination).is_err());
    }

    #[test]
    fn test_unopenable_file_falls_back_to_syslog() {
        let destination = LogDestination::File(PathBuf::from("/nonexistent/dir/cmdchk.log"));

        let (sink, failure) = open_or_syslog(&destination);
        assert!(matches!(sink, Sink::Syslog));
        assert_eq!(failure.unwrap().kind(), io::ErrorKind::NotFound);

        install(&destination).unwrap();
    }

    #[test]
    fn test_file_rolls_over_at_day_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmdchk.log");
        let day = today();

        let mut file = RotatingFile::open(&path).unwrap();
        file.write_line("INFO: first day\n", day).unwrap();
        file.write_line("INFO: still first day\n", day).unwrap();
        file.write_line("INFO: second day\n", day.next_day().unwrap()).unwrap();

        let rotated = rotated_path(&path, day).unwrap();
        assert_eq!(
            fs::read_to_string(&rotated).unwrap(),
            "INFO: first day\nINFO: still first day\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO: second day\n");
    }

    #[test]
    fn test_rotation_keeps_six_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cmdchk.log");
        let start = today();

        let mut file = RotatingFile::open(&path).unwrap();
        for offset in 1..=8 {
            let day = start + time::Duration::days(offset);
            file.write_line(&format!("INFO: day {}\n", offset), day).unwrap();
        }

        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .count();
        assert_eq!(rotated, KEEP_ROTATED);
        assert!(!rotated_path(&path, start).unwrap().exists());
        assert!(!rotated_path(&path, start + time::Duration::days(1)).unwrap().exists());
        assert!(rotated_path(&path, start + time::Duration::days(7)).unwrap().exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "INFO: day 8\n");
    }

    #[test]
    fn test_access_timestamp_layout() {
        let stamp = access_timestamp();
        // dd/Mon/yyyy hh:mm:ss
        assert_eq!(stamp.len(), 20);
        assert_eq!(&stamp[2..3], "/");
        assert_eq!(&stamp[6..7], "/");
    }
}
