//! Terminal rendering of worker messages.
//! Used by both `streamscribe transcribe` and `streamscribe send`.

use crate::ipc::protocol::{LoadingStatus, WorkerEvent, WorkerMessage};
use crate::reconcile::ProcessedInterval;
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Clear the current terminal line (replaces progress and previews)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// `mm:ss`, or `h:mm:ss` past the hour.
pub fn format_timestamp(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

pub fn format_interval(interval: &ProcessedInterval) -> String {
    format!(
        "[{} -> {}] {}",
        format_timestamp(interval.start),
        format_timestamp(interval.end),
        interval.text
    )
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MB", bytes as f64 / MB)
}

/// Prints worker messages as JSON lines or as a live terminal view.
///
/// JSON mode writes every message to stdout unchanged. Pretty mode shows
/// progress and previews on stderr and prints the final transcript to stdout
/// once the request finishes.
#[derive(Debug, Default)]
pub struct MessageRenderer {
    pretty: bool,
    quiet: bool,
    transcript: Vec<ProcessedInterval>,
}

impl MessageRenderer {
    pub fn new(pretty: bool, quiet: bool) -> Self {
        Self {
            pretty,
            quiet,
            transcript: Vec::new(),
        }
    }

    /// Latest interval snapshot.
    pub fn transcript(&self) -> &[ProcessedInterval] {
        &self.transcript
    }

    pub fn render(&mut self, message: &WorkerMessage) {
        if let WorkerEvent::Result { results, .. } = &message.event {
            self.transcript = results.clone();
        }

        if !self.pretty {
            match message.to_json() {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize message"),
            }
            return;
        }

        match &message.event {
            WorkerEvent::Loading { status } => {
                if self.quiet {
                    return;
                }
                clear_line();
                match status {
                    LoadingStatus::Loading => eprintln!("{DIM}Loading model...{RESET}"),
                    LoadingStatus::Success => eprintln!("{GREEN}Model ready{RESET}"),
                    LoadingStatus::Error => eprintln!("{RED}Model failed to load{RESET}"),
                }
            }
            WorkerEvent::Downloading {
                file,
                progress,
                loaded,
                total,
            } => {
                if self.quiet {
                    return;
                }
                eprint!(
                    "\r\x1b[2KDownloading {file}: {progress:.0}% ({} / {})",
                    format_bytes(*loaded),
                    format_bytes(*total)
                );
                io::stderr().flush().ok();
            }
            WorkerEvent::ResultPartial { result } => {
                if self.quiet {
                    return;
                }
                eprint!(
                    "\r\x1b[2K{DIM}[{}] ...{}{RESET}",
                    format_timestamp(result.start),
                    result.text
                );
                io::stderr().flush().ok();
            }
            WorkerEvent::Result {
                results,
                completed_until_timestamp,
                ..
            } => {
                if self.quiet {
                    return;
                }
                clear_line();
                if let Some(last) = results.last() {
                    eprint!(
                        "{DIM}{} intervals until {}{RESET}  {}",
                        results.len(),
                        format_timestamp(*completed_until_timestamp),
                        last.text
                    );
                }
                io::stderr().flush().ok();
            }
            WorkerEvent::InferenceDone => {
                clear_line();
                for interval in &self.transcript {
                    println!("{}", format_interval(interval));
                }
            }
            WorkerEvent::InferenceError { message } => {
                clear_line();
                eprintln!("{RED}Transcription failed: {message}{RESET}");
            }
            WorkerEvent::Cancelled => {
                clear_line();
                eprintln!("{DIM}Transcription cancelled{RESET}");
            }
        }
    }
}
