//! Turns captured sandbox streams into an [`ExecutionOutcome`].
//!
//! Stdout carries the user's output interleaved with at most one meaningful
//! result line; stderr carries diagnostics and, on failure, the harness's
//! classified error line. In both streams the last tagged line wins, since
//! the harness always writes its line after any user code has run.

use serde_json::Value;

use crate::core_types::{ErrorType, ExecutionOutcome, HarnessFailureKind, OutcomeError};
use crate::harness::SignalProtocol;
use crate::sandbox::SandboxOutput;

/// User output and the last result payload found on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScannedStdout {
    pub user_output: String,
    pub payload: Option<String>,
}

/// An error line reported by the harness on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLine<'a> {
    pub kind: &'a str,
    pub detail: &'a str,
    pub raw: &'a str,
}

/// Splits stdout into user output and the result payload.
///
/// Lines are split inclusively so user output keeps its exact bytes. Text in
/// front of the prefix on a result line is user output that lacked a
/// trailing newline.
pub fn scan_stdout(stdout: &str, result_prefix: &str) -> ScannedStdout {
    let mut scanned = ScannedStdout {
        user_output: String::with_capacity(stdout.len()),
        payload: None,
    };
    for line in stdout.split_inclusive('\n') {
        match line.find(result_prefix) {
            Some(pos) => {
                scanned.user_output.push_str(&line[..pos]);
                let payload = &line[pos + result_prefix.len()..];
                scanned.payload = Some(payload.trim_end_matches(['\n', '\r']).to_string());
            }
            None => scanned.user_output.push_str(line),
        }
    }
    scanned
}

/// Finds the last line on stderr carrying the error prefix.
pub fn last_error_line<'a>(stderr: &'a str, error_prefix: &str) -> Option<ErrorLine<'a>> {
    stderr.lines().rev().find_map(|line| {
        let pos = line.find(error_prefix)?;
        let rest = line[pos + error_prefix.len()..].trim_end_matches('\r');
        let (kind, detail) = rest.split_once(':').unwrap_or((rest, ""));
        Some(ErrorLine {
            kind,
            detail,
            raw: line,
        })
    })
}

/// Caps `text` at `max_chars` characters.
///
/// Text within budget is returned untouched. Otherwise the first `max_chars`
/// characters are kept, a newline is ensured and one marker line stating the
/// number of elided characters is appended.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());

    let mut truncated = String::with_capacity(cut + 64);
    truncated.push_str(&text[..cut]);
    if !truncated.ends_with('\n') {
        truncated.push('\n');
    }
    truncated.push_str(&format!(
        "... [output truncated: {} characters omitted]\n",
        total - max_chars
    ));
    truncated
}

/// Builds the caller-facing outcome for one finished sandbox run.
pub fn extract(
    output: &SandboxOutput,
    protocol: &SignalProtocol,
    max_output_chars: usize,
) -> ExecutionOutcome {
    let scanned = scan_stdout(&output.stdout, protocol.result_prefix());
    let stdout = truncate_output(&scanned.user_output, max_output_chars);

    if output.exit_code != 0 {
        let error = classify_failure(output, protocol.error_prefix(), max_output_chars);
        log::debug!(
            "Script failed with exit code {}: {} ({})",
            output.exit_code,
            error.message,
            error.error_type
        );
        return ExecutionOutcome::failure(error, stdout);
    }

    let Some(payload) = scanned.payload else {
        log::error!(
            "Harness exited cleanly without a result line (stderr: {} bytes)",
            output.stderr.len()
        );
        let mut error = OutcomeError::new(ErrorType::HarnessError, "main() did not produce a result");
        if !output.stderr.trim().is_empty() {
            error = error.with_details(truncate_output(&output.stderr, max_output_chars));
        }
        return ExecutionOutcome::failure(error, stdout);
    };

    match serde_json::from_str::<Value>(&payload) {
        Ok(result) => ExecutionOutcome::success(result, stdout),
        Err(e) => {
            log::error!("Harness emitted an undecodable result payload: {}", e);
            ExecutionOutcome::failure(
                OutcomeError::new(ErrorType::SerializationError, "invalid result payload")
                    .with_details(e.to_string()),
                stdout,
            )
        }
    }
}

fn classify_failure(output: &SandboxOutput, error_prefix: &str, max_chars: usize) -> OutcomeError {
    if let Some(line) = last_error_line(&output.stderr, error_prefix) {
        if let Some(kind) = HarnessFailureKind::from_tag(line.kind) {
            let error = OutcomeError::new(kind.error_type(), kind.message()).with_kind(kind);
            return if line.detail.is_empty() {
                error
            } else {
                error.with_details(line.detail)
            };
        }
        log::warn!("Unrecognized harness failure kind '{}'", line.kind);
    }

    let details = if output.stderr.trim().is_empty() {
        format!("process exited with status {}", output.exit_code)
    } else {
        truncate_output(&output.stderr, max_chars)
    };
    OutcomeError::new(ErrorType::ExecutionError, "script crashed").with_details(details)
}
