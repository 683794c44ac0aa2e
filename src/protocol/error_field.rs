//! Parsing of the `error` message field.
//!
//! Format: `"<3-digit code>:<comma-separated args>:<description>"`, for example
//! `"403:xj3sjdsjdsjad,/foo/bar:Subscription denied"`.

use std::sync::LazyLock;

use regex::Regex;

/// Three digits at the start of the field.
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3}").expect("valid regex"));

/// Everything between the first and the last colon.
static ARGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(.*):").expect("valid regex"));

/// Everything after the last colon.
static MESSAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([^:]*)$").expect("valid regex"));

/// HTTP status codes treated as authentication failures.
///
/// Some channels answer auth failures with 403 instead of 401.
const AUTH_ERROR_CODES: [u16; 2] = [401, 403];

/// The parts of an `error` field. Parts that can't be matched are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorField {
    /// Leading 3-digit code.
    pub code: Option<u16>,
    /// Comma separated arguments; empty when the args part is empty.
    pub args: Option<Vec<String>>,
    /// Description after the last colon.
    pub message: Option<String>,
}

impl ErrorField {
    /// Parses an error field.
    #[must_use]
    pub fn parse(field: &str) -> Self {
        let code = CODE_RE
            .find(field)
            .and_then(|m| m.as_str().parse::<u16>().ok());

        let args = ARGS_RE.captures(field).map(|caps| {
            let raw = caps.get(1).map_or("", |m| m.as_str());
            if raw.is_empty() {
                Vec::new()
            } else {
                raw.split(',').map(str::to_string).collect()
            }
        });

        let message = MESSAGE_RE
            .captures(field)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        Self {
            code,
            args,
            message,
        }
    }

    /// Returns `true` if the code is 401 or 403.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.code.is_some_and(|code| AUTH_ERROR_CODES.contains(&code))
    }
}

// ============================================================================
// Tests
// ============================================================================
