//! Structured logging for tooldeck.
//!
//! Conventions used across the codebase:
//!
//! - `operation`: the operation being performed (e.g., "cache.store", "host.execute")
//! - `status`: the result status ("success", "miss", "error", "cancelled")
//! - `key`: cache key (repository-relative path)
//! - `size_bytes`: payload size in bytes

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "tooldeck" instead of the full module path
struct TooldeckFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for TooldeckFormatter
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
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(
                writer,
                "{}{:5}(tooldeck)\x1b[0m: ",
                level_style,
                meta.level()
            )?;
        } else {
            write!(writer, "{:5}(tooldeck): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (TOOLDECK_LOG_FORMAT)
    pub fn from_env() -> Self {
        match std::env::var("TOOLDECK_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            }
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` selects the level filter; `TOOLDECK_LOG_FORMAT` selects the
/// output format ("pretty", "compact", "json"). Under `CI` the default
/// flips to compact.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    match LogFormat::from_env() {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(TooldeckFormatter { with_ansi: true })
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(TooldeckFormatter { with_ansi: false })
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_ansi(false)
                        .with_writer(io::stderr)
                        .json(),
                )
                .init();
        }
    }
}
