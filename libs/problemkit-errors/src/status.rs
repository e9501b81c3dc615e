//! Status classification for Problem Details responses

use http::StatusCode;

/// Lowest status code considered a problem.
pub const PROBLEM_STATUS_MIN: u16 = 400;

/// Highest status code considered a problem.
pub const PROBLEM_STATUS_MAX: u16 = 599;

/// A status code in the inclusive range `[400, 599]` is a problem status.
#[must_use]
pub const fn is_problem_status(code: u16) -> bool {
    code >= PROBLEM_STATUS_MIN && code <= PROBLEM_STATUS_MAX
}

/// Classification helpers for `http::StatusCode`.
pub trait StatusCodeExt {
    /// Returns `true` if this status lies in the problem range.
    fn is_problem(&self) -> bool;

    /// Human-readable title for this status.
    ///
    /// Uses the canonical reason phrase, falling back to a class title for codes
    /// that have none.
    fn problem_title(&self) -> &'static str;
}

impl StatusCodeExt for StatusCode {
    fn is_problem(&self) -> bool {
        is_problem_status(self.as_u16())
    }

    fn problem_title(&self) -> &'static str {
        if let Some(reason) = self.canonical_reason() {
            return reason;
        }
        if self.is_client_error() {
            "Client Error"
        } else if self.is_server_error() {
            "Server Error"
        } else {
            "Unknown Status"
        }
    }
}
