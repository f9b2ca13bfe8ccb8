//! Output stream classification and fan-out.
//!
//! The interpreter process exposes two pipes, but scripts speak five
//! logical channels: regular output, warnings, verbose diagnostics,
//! progress percentages, and errors. The interpreter renders the first
//! four onto stdout with conventional line prefixes; stderr carries the
//! error channel. The reader threads here classify each stdout line and
//! forward it to the caller's sinks as it arrives, folding warnings and
//! verbose text into the output sink with a category prefix so callers
//! wire three callbacks instead of five.

use std::io::BufRead;
use std::sync::{Arc, Mutex};

/// Line-oriented callback, invoked from a reader thread.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Percent-complete callback (0-100), invoked from a reader thread.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// One classified stdout line.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamLine<'a> {
    Output(&'a str),
    Warning(&'a str),
    Verbose(&'a str),
    Progress(u8),
}

/// Classifies a stdout line by its channel prefix.
///
/// A `PROGRESS:` line that does not parse as a percentage is passed
/// through as plain output rather than dropped.
pub fn classify_line(line: &str) -> StreamLine<'_> {
    if let Some(rest) = line.strip_prefix("WARNING:") {
        StreamLine::Warning(rest.trim_start())
    } else if let Some(rest) = line.strip_prefix("VERBOSE:") {
        StreamLine::Verbose(rest.trim_start())
    } else if let Some(rest) = line.strip_prefix("PROGRESS:") {
        match rest.trim().parse::<u8>() {
            Ok(percent) => StreamLine::Progress(percent.min(100)),
            Err(_) => StreamLine::Output(line),
        }
    } else {
        StreamLine::Output(line)
    }
}

/// Drains the interpreter's stdout pipe until EOF, forwarding each line
/// to the sinks and accumulating the textual channels.
pub(super) fn drain_stdout(
    reader: impl BufRead,
    output_sink: Option<LineSink>,
    progress_sink: Option<ProgressSink>,
    accumulated: Arc<Mutex<Vec<String>>>,
) {
    for line in reader.lines() {
        let Ok(line) = line else { break };

        match classify_line(&line) {
            StreamLine::Output(text) => forward(text, &output_sink, &accumulated),
            StreamLine::Warning(text) => {
                forward(&format!("[warning] {text}"), &output_sink, &accumulated)
            }
            StreamLine::Verbose(text) => {
                forward(&format!("[verbose] {text}"), &output_sink, &accumulated)
            }
            StreamLine::Progress(percent) => {
                if let Some(sink) = &progress_sink {
                    sink(percent);
                }
            }
        }
    }
}

/// Drains the interpreter's stderr pipe until EOF. Every line is an
/// error-channel entry: forwarded to the error sink and accumulated for
/// the success verdict.
pub(super) fn drain_stderr(
    reader: impl BufRead,
    error_sink: Option<LineSink>,
    accumulated: Arc<Mutex<Vec<String>>>,
) {
    for line in reader.lines() {
        let Ok(line) = line else { break };

        if let Some(sink) = &error_sink {
            sink(&line);
        }
        if let Ok(mut lines) = accumulated.lock() {
            lines.push(line);
        }
    }
}

fn forward(text: &str, sink: &Option<LineSink>, accumulated: &Arc<Mutex<Vec<String>>>) {
    if let Some(sink) = sink {
        sink(text);
    }
    if let Ok(mut lines) = accumulated.lock() {
        lines.push(text.to_string());
    }
}
