//! Tracing setup shared by the spawner binary and its tests.
//!
//! Settings are resolved once into [`LogSettings`] and handed to [`init`]; nothing in
//! here reads the environment after that point.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive,
    fmt::{writer::BoxMakeWriter, MakeWriter},
    prelude::*,
    registry::Registry,
    EnvFilter, Layer,
};

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "/tmp/aca-spawner.log";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Where formatted events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    Off,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            "off" | "none" => LogOutput::Off,
            _ => LogOutput::Console,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
    Compact,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Human,
        }
    }
}

/// Resolved logging options.
///
/// | Variable        | Effect                                   | Default                 |
/// |-----------------|------------------------------------------|-------------------------|
/// | `RUST_LOG`      | full filter directive, wins over level   | unset                   |
/// | `LOG_LEVEL`     | global level when `RUST_LOG` is unset     | `info`                  |
/// | `LOG_OUTPUT`    | `console`, `file`, `both` or `off`       | `console`               |
/// | `LOG_FORMAT`    | `human`, `json` or `compact`             | `human`                 |
/// | `LOG_FILE_PATH` | daily-rolled file used by file output    | `/tmp/aca-spawner.log`  |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LEVEL.to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file_path: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let filter = lookup("RUST_LOG")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| lookup("LOG_LEVEL").filter(|s| !s.trim().is_empty()))
            .unwrap_or(defaults.filter);

        Self {
            filter,
            output: lookup("LOG_OUTPUT")
                .map(|v| LogOutput::parse(&v))
                .unwrap_or(defaults.output),
            format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.format),
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let filter = EnvFilter::try_new(&self.filter).map_err(|e| LoggingError::Filter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })?;
        // HTTP plumbing stays at warn unless the filter names it.
        let filter = quieted_targets(&self.filter)
            .into_iter()
            .filter_map(|target| format!("{target}=warn").parse::<Directive>().ok())
            .fold(filter, |filter, directive| filter.add_directive(directive));
        Ok(filter)
    }
}

const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "rustls"];
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Quiet targets that no directive in `filter` mentions.
fn quieted_targets(filter: &str) -> Vec<&'static str> {
    let named: Vec<&str> = filter
        .split(',')
        .filter_map(|directive| {
            let directive = directive.trim();
            let target = directive.split(['[', '=']).next()?.trim();
            let bare_level = target.len() == directive.len()
                && LEVELS.contains(&target.to_ascii_lowercase().as_str());
            (!target.is_empty() && !bare_level).then_some(target)
        })
        .collect();

    QUIET_TARGETS
        .iter()
        .copied()
        .filter(|quiet| {
            !named
                .iter()
                .any(|t| *t == *quiet || t.starts_with(&format!("{quiet}::")))
        })
        .collect()
}

// --- Tee writer: one event, two sinks ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| "aca-spawner.log".as_ref());
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}

fn fmt_layer(
    format: LogFormat,
    writer: BoxMakeWriter,
    ansi: bool,
) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Human => layer.pretty().boxed(),
    }
}

/// Installs the global subscriber.
///
/// Console output goes to stderr so command output on stdout stays parseable. The
/// returned guard must be held for the life of the process when file output is on,
/// otherwise buffered lines are lost.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = settings.env_filter()?;

    let (writer, guard, ansi) = match settings.output {
        LogOutput::Off => {
            return tracing_subscriber::registry()
                .with(env_filter)
                .try_init()
                .map(|_| None)
                .map_err(|e| LoggingError::Install(e.to_string()));
        }
        LogOutput::Console => (BoxMakeWriter::new(io::stderr), None, true),
        LogOutput::File => {
            let (non_blocking, guard) = file_writer(&settings.file_path);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        LogOutput::Both => {
            let (non_blocking, guard) = file_writer(&settings.file_path);
            let tee = MakeTee {
                make_a: io::stderr,
                make_b: non_blocking,
            };
            (BoxMakeWriter::new(tee), Some(guard), false)
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer(settings.format, writer, ansi))
        .with(env_filter)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(guard)
}
