//! Retry HMC commands without attributes the console does not know.
//!
//! Optional `-F` fields and flags come and go between HMC releases (for
//! example `analyzing_mtms` appeared in V7R7.9). When the console answers
//! with "An invalid attribute ..." or "An invalid parameter ...", the
//! offending token is cut from the command and the command is re-issued.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::info;

use crate::session::{CommandOutput, RemoteSession, SessionError, ShellMode};

/// Marker the HMC puts at the start of an invalid-token error.
pub const INVALID_MARKER: &str = "An invalid";

/// `is <token>.` for attributes, `rs <token>.` for parameters.
static INVALID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" is ([^ .]+)|rs ([^ .]+)").expect("invalid-token pattern"));

/// What the first output line says about the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputClass {
    /// No invalid-token report.
    Accepted,
    /// The console rejected this attribute or parameter.
    InvalidToken(String),
    /// An invalid-token report the token could not be extracted from.
    Unparseable,
}

/// Classify the first line of a command's output.
#[must_use]
pub fn classify(first_line: Option<&str>) -> OutputClass {
    let Some(line) = first_line else {
        return OutputClass::Accepted;
    };
    if !line.contains(INVALID_MARKER) {
        return OutputClass::Accepted;
    }

    INVALID_TOKEN
        .captures(line)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|token| !token.is_empty())
        .map_or(OutputClass::Unparseable, OutputClass::InvalidToken)
}

/// Remove a rejected token from `command`.
///
/// Attribute names are only removed from the `-F` field list, flags only
/// where they stand as a whole word, so a partition or system name equal to
/// the token is left alone. A `-F` list is never emptied: the command then
/// comes back unchanged.
#[must_use]
pub fn strip_token(command: &str, token: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut in_field_list = false;

    for word in command.split_whitespace() {
        if in_field_list {
            in_field_list = false;
            let fields: Vec<&str> = word.split(':').filter(|f| !f.is_empty()).collect();
            let kept: Vec<&str> = fields.iter().copied().filter(|f| *f != token).collect();
            if kept.is_empty() {
                words.push(word.to_string());
            } else {
                words.push(kept.join(":"));
            }
            continue;
        }
        if word == "-F" {
            in_field_list = true;
        } else if word == token && token.starts_with('-') {
            continue;
        }
        words.push(word.to_string());
    }

    words.join(" ")
}

/// Run `command`, dropping rejected tokens until the console accepts it.
///
/// Each retry removes at least one token, so the loop ends when the
/// command stops shrinking. Session errors propagate unchanged.
///
/// # Errors
///
/// Returns the first [`SessionError`] raised by the session.
pub async fn run_adaptive(
    session: &mut dyn RemoteSession,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, SessionError> {
    let mut command = command.to_string();
    let mut output = session
        .run_command(&command, timeout, ShellMode::Standard)
        .await?;

    while let OutputClass::InvalidToken(token) = classify(output.first_line()) {
        let retry = strip_token(&command, &token);
        if retry.len() >= command.len() {
            info!("Invalid token {token} not found in command, giving up on adaptation");
            break;
        }
        info!("Retrying command without {token}");
        command = retry;
        output = session
            .run_command(&command, timeout, ShellMode::Standard)
            .await?;
    }

    Ok(output)
}
