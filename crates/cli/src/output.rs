// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.
//
// Exit codes: 0 success, 1 general error, 10 relay unreachable, 13 timeout.

use docsync_client::ConnectError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

const EXIT_ERROR: u8 = 1;
const EXIT_RELAY_DOWN: u8 = 10;
const EXIT_TIMEOUT: u8 = 13;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per line).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line("error", message, io::stderr().is_terminal());
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a command failure with a stable error code.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    print_error(format, error_code(error), &format!("{error:#}"));
}

/// Process exit code for a command failure.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    match connect_error(error) {
        Some(ConnectError::Transport(_)) | Some(ConnectError::InvalidUrl { .. }) => EXIT_RELAY_DOWN,
        Some(ConnectError::Timeout) => EXIT_TIMEOUT,
        _ if format!("{error:#}").contains("timed out") => EXIT_TIMEOUT,
        _ => EXIT_ERROR,
    }
}

fn error_code(error: &anyhow::Error) -> &'static str {
    match connect_error(error) {
        Some(ConnectError::Transport(_)) => "RELAY_UNREACHABLE",
        Some(ConnectError::InvalidUrl { .. }) => "INVALID_RELAY_URL",
        Some(ConnectError::Timeout) => "RELAY_TIMEOUT",
        Some(ConnectError::Cancelled) | Some(ConnectError::Stopped) => "CLIENT_STOPPED",
        None => "ERROR",
    }
}

fn connect_error(error: &anyhow::Error) -> Option<&ConnectError> {
    error.chain().find_map(|cause| cause.downcast_ref::<ConnectError>())
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool) -> String {
    if is_tty {
        format!("{ANSI_RED}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
