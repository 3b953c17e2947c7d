//! File logging bootstrap for the persistence core.
//!
//! # Responsibility
//! - Start one rolling file logger per process.
//! - Keep DAO events metadata-only (`event=... status=...`), never entity data.
//!
//! # Invariants
//! - Initialization is idempotent for the same level and directory.
//! - A second initialization with different settings is rejected.
//! - Initialization never panics.

use crate::config::LogSettings;
use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming, WriteMode,
};
use log::info;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_BASENAME: &str = "addressbook";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_FILES: usize = 4;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    dir: PathBuf,
    _handle: LoggerHandle,
}

/// Logger bootstrap failure.
#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeDirectory(PathBuf),
    CreateDirectory {
        dir: PathBuf,
        source: std::io::Error,
    },
    Backend(FlexiLoggerError),
    Conflict {
        active_level: &'static str,
        active_dir: PathBuf,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::RelativeDirectory(dir) => {
                write!(f, "log directory must be absolute, got `{}`", dir.display())
            }
            Self::CreateDirectory { dir, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                dir.display()
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::Conflict {
                active_level,
                active_dir,
            } => write!(
                f,
                "logging already active with level `{active_level}` at `{}`",
                active_dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDirectory { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Starts file logging in `dir` at `level`.
///
/// # Errors
/// - `UnsupportedLevel` / `RelativeDirectory` for bad input.
/// - `Conflict` when logging already runs with other settings.
pub fn init_logging(level: &str, dir: impl AsRef<Path>) -> Result<(), LoggingError> {
    let level = parse_level(level)?;
    let dir = dir.as_ref();
    if !dir.is_absolute() {
        return Err(LoggingError::RelativeDirectory(dir.to_path_buf()));
    }

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_logger(level, dir))?;
    if active.level != level || active.dir != dir {
        return Err(LoggingError::Conflict {
            active_level: active.level,
            active_dir: active.dir.clone(),
        });
    }
    Ok(())
}

/// Starts file logging when `settings.dir` is set; returns whether it did.
pub fn init_from_settings(settings: &LogSettings) -> Result<bool, LoggingError> {
    match &settings.dir {
        Some(dir) => init_logging(&settings.level, dir).map(|()| true),
        None => Ok(false),
    }
}

/// Returns `(level, dir)` of the active logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE_LOGGER
        .get()
        .map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(level: &'static str, dir: &Path) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDirectory {
        dir: dir.to_path_buf(),
        source,
    })?;

    let handle = Logger::try_with_str(level)
        .map_err(LoggingError::Backend)?
        .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(LoggingError::Backend)?;

    info!(
        "event=logging_init module=core status=ok level={level} version={}",
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        _ => Err(LoggingError::UnsupportedLevel(level.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_normalizes_case_and_aliases() {
        assert_eq!(parse_level(" INFO ").unwrap(), "info");
        assert_eq!(parse_level("warning").unwrap(), "warn");
        assert!(matches!(
            parse_level("loud"),
            Err(LoggingError::UnsupportedLevel(level)) if level == "loud"
        ));
    }

    #[test]
    fn relative_directory_is_rejected_before_starting() {
        let err = init_logging("info", "logs/dev").unwrap_err();
        assert!(matches!(err, LoggingError::RelativeDirectory(_)));
    }

    #[test]
    fn settings_without_directory_do_not_start_logging() {
        let settings = LogSettings {
            level: "info".to_string(),
            dir: None,
        };
        assert!(!init_from_settings(&settings).unwrap());
    }

    #[test]
    fn init_is_idempotent_and_rejects_conflicts() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        init_logging("info", first.path()).unwrap();
        init_logging("info", first.path()).unwrap();

        let level_conflict = init_logging("debug", first.path()).unwrap_err();
        assert!(matches!(level_conflict, LoggingError::Conflict { .. }));

        let dir_conflict = init_logging("info", second.path()).unwrap_err();
        assert!(matches!(dir_conflict, LoggingError::Conflict { .. }));

        let (level, dir) = logging_status().unwrap();
        assert_eq!(level, "info");
        assert_eq!(dir, first.path());
    }
}
