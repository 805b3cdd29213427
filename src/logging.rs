//! Structured logging for Stitches
//!
//! Diagnostics go to stderr through `tracing`; the run reporter owns stdout.
//! Events carry structured fields rather than formatted strings:
//!
//! - `task`: task identity (e.g. `1/0`)
//! - `decision`: `run` or `skip`
//! - `reason`: why a task runs
//! - `path`: file involved (state document, log file)
//!
//! ```rust
//! use tracing::info;
//!
//! info!(task = "1/0", decision = "run", reason = "parameters changed", "evaluated");
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter that prints `LEVEL(stitches):` instead of the module path
struct StitchesFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for StitchesFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(stitches)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(stitches): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Uncolored, for CI
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse a format name; unknown names yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// From `STITCHES_LOG_FORMAT`, defaulting to compact under CI
    pub fn from_env() -> Self {
        std::env::var("STITCHES_LOG_FORMAT")
            .ok()
            .and_then(|name| Self::parse(&name))
            .unwrap_or_else(|| {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            })
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (default `warn`)
/// - `STITCHES_LOG_FORMAT`: "pretty", "compact" or "json"
/// - `CI`: if set, defaults to compact format
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let layer = match LogFormat::from_env() {
        LogFormat::Pretty => fmt::layer()
            .event_format(StitchesFormatter { with_ansi: true })
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .event_format(StitchesFormatter { with_ansi: false })
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(false)
            .with_writer(io::stderr)
            .json()
            .boxed(),
    };

    // A second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
