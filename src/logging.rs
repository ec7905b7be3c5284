use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

const DEFAULT_LOG_FILTER: &str = "warn,parley=info";
const DEFAULT_LOG_FILE_PATH: &str = "logs/parley.log";
const FALLBACK_LOG_FILE_NAME: &str = "parley.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    File,
    Both,
}

impl LogOutput {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stderr => "stderr",
            Self::File => "file",
            Self::Both => "both",
        }
    }
}

/// Where and how log events are written, read from `LOG_FORMAT`,
/// `LOG_OUTPUT` and `LOG_FILE_PATH`. The level filter comes from `RUST_LOG`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_env_with(|key| env::var(key).ok())
    }

    fn from_env_with(mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        let format = match normalized(get_var("LOG_FORMAT")).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let output = match normalized(get_var("LOG_OUTPUT")).as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Stderr,
        };
        let file_path = get_var("LOG_FILE_PATH")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE_PATH));

        Self {
            format,
            output,
            file_path,
        }
    }
}

fn normalized(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_ascii_lowercase())
}

/// Installs the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with(&LogSettings::from_env());
}

fn init_with(settings: &LogSettings) {
    let writer = match settings.output {
        LogOutput::Stderr => BoxMakeWriter::new(io::stderr),
        LogOutput::File | LogOutput::Both => match open_file_writer(&settings.file_path) {
            Ok((file_writer, guard)) => {
                let _ = LOG_GUARD.set(guard);
                if settings.output == LogOutput::Both {
                    BoxMakeWriter::new(io::stderr.and(file_writer))
                } else {
                    BoxMakeWriter::new(file_writer)
                }
            }
            Err(err) => {
                let fallback = if settings.output == LogOutput::Both {
                    "using stderr only"
                } else {
                    "using stderr instead"
                };
                eprintln!(
                    "parley: failed to initialize LOG_OUTPUT={} at '{}': {}; {}",
                    settings.output.as_str(),
                    settings.file_path.display(),
                    err,
                    fallback
                );
                BoxMakeWriter::new(io::stderr)
            }
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = match settings.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init(),
    };
}

fn open_file_writer(path: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| std::ffi::OsStr::new(FALLBACK_LOG_FILE_NAME));

    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
