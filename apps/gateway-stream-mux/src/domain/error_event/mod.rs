//! Gateway Error Events
//!
//! Error notifications pushed by the wire, keyed by request id. The sentinel
//! [`CONNECTION_REQUEST_ID`] marks connection-level errors that belong to no
//! request.
//!
//! Severity is decided by an [`ErrorPolicy`]: the gateway mixes informational
//! notices (data farm status, delayed data) into the same error callback as
//! real request failures, and only the latter end a subscription.

use std::ops::RangeInclusive;

use serde::Serialize;
use thiserror::Error;

/// Wire request identifier assigned by the transport.
pub type RequestId = i32;

/// Request id carried by connection-level errors.
pub const CONNECTION_REQUEST_ID: RequestId = -1;

// =============================================================================
// Error Event
// =============================================================================

/// Severity of an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational notice; the request keeps running.
    Warning,
    /// The request (or connection) failed.
    #[default]
    Fatal,
}

/// Error notification from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("request {request_id} failed with code {code}: {message}")]
pub struct ErrorEvent {
    /// Owning wire request, or [`CONNECTION_REQUEST_ID`].
    pub request_id: RequestId,
    /// Gateway error code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Optional extra detail (advanced order reject JSON).
    pub advanced_order_reject: Option<String>,
    /// Severity, assigned by the registry's [`ErrorPolicy`].
    pub severity: ErrorSeverity,
}

impl ErrorEvent {
    /// Create a request-scoped error.
    #[must_use]
    pub fn new(request_id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            request_id,
            code,
            message: message.into(),
            advanced_order_reject: None,
            severity: ErrorSeverity::Fatal,
        }
    }

    /// Create a connection-level error.
    #[must_use]
    pub fn connection(code: i32, message: impl Into<String>) -> Self {
        Self::new(CONNECTION_REQUEST_ID, code, message)
    }

    /// Attach the advanced order reject detail.
    #[must_use]
    pub fn with_advanced_order_reject(mut self, detail: impl Into<String>) -> Self {
        self.advanced_order_reject = Some(detail.into());
        self
    }

    /// Check if this error is not tied to a request.
    #[must_use]
    pub const fn is_connection_level(&self) -> bool {
        self.request_id == CONNECTION_REQUEST_ID
    }

    /// Check if this error ends the request it belongs to.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.severity, ErrorSeverity::Fatal)
    }
}

// =============================================================================
// Error Policy
// =============================================================================

/// Error returned when a warning code list cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid error code entry '{0}' (expected CODE or FIRST-LAST)")]
pub struct InvalidCodeList(pub String);

/// Classifies error codes into warnings and failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    warning_codes: Vec<RangeInclusive<i32>>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        // 2100-2169: data farm and connectivity notices, 10167: delayed data shown
        Self {
            warning_codes: vec![2100..=2169, 10167..=10167],
        }
    }
}

impl ErrorPolicy {
    /// Create a policy from explicit warning code ranges.
    #[must_use]
    pub const fn new(warning_codes: Vec<RangeInclusive<i32>>) -> Self {
        Self { warning_codes }
    }

    /// Create a policy that treats every error as fatal.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            warning_codes: Vec::new(),
        }
    }

    /// Parse a list such as `"2100-2169,10167"`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCodeList`] naming the first entry that is neither a
    /// code nor an ascending `FIRST-LAST` range.
    pub fn parse(list: &str) -> Result<Self, InvalidCodeList> {
        let mut warning_codes = Vec::new();

        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || InvalidCodeList(entry.to_string());
            let range = match entry.split_once('-') {
                Some((first, last)) => {
                    let first: i32 = first.trim().parse().map_err(|_| invalid())?;
                    let last: i32 = last.trim().parse().map_err(|_| invalid())?;
                    if first > last {
                        return Err(invalid());
                    }
                    first..=last
                }
                None => {
                    let code: i32 = entry.parse().map_err(|_| invalid())?;
                    code..=code
                }
            };
            warning_codes.push(range);
        }

        Ok(Self { warning_codes })
    }

    /// Severity for an error code.
    #[must_use]
    pub fn severity(&self, code: i32) -> ErrorSeverity {
        if self.warning_codes.iter().any(|range| range.contains(&code)) {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Fatal
        }
    }

    /// Stamp an event with the severity of its code.
    #[must_use]
    pub fn classify(&self, mut event: ErrorEvent) -> ErrorEvent {
        event.severity = self.severity(event.code);
        event
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(2104, ErrorSeverity::Warning ; "market data farm ok")]
    #[test_case(2158, ErrorSeverity::Warning ; "sec def farm ok")]
    #[test_case(10167, ErrorSeverity::Warning ; "delayed data")]
    #[test_case(200, ErrorSeverity::Fatal ; "no security definition")]
    #[test_case(354, ErrorSeverity::Fatal ; "not subscribed")]
    #[test_case(2170, ErrorSeverity::Fatal ; "just past warning range")]
    fn default_policy_classification(code: i32, expected: ErrorSeverity) {
        assert_eq!(ErrorPolicy::default().severity(code), expected);
    }

    #[test]
    fn parse_codes_and_ranges() {
        let policy = ErrorPolicy::parse("2100-2102, 399").unwrap();

        assert_eq!(policy.severity(2101), ErrorSeverity::Warning);
        assert_eq!(policy.severity(399), ErrorSeverity::Warning);
        assert_eq!(policy.severity(2103), ErrorSeverity::Fatal);
    }

    #[test]
    fn parse_empty_list_is_strict() {
        assert_eq!(ErrorPolicy::parse(" ").unwrap(), ErrorPolicy::strict());
    }

    #[test]
    fn parse_rejects_descending_range() {
        assert_eq!(
            ErrorPolicy::parse("2169-2100"),
            Err(InvalidCodeList("2169-2100".to_string()))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ErrorPolicy::parse("21xx").is_err());
    }

    #[test]
    fn classify_sets_severity() {
        let event = ErrorPolicy::default().classify(ErrorEvent::new(7, 2104, "farm ok"));
        assert!(!event.is_terminal());

        let event = ErrorPolicy::default().classify(ErrorEvent::new(7, 200, "no definition"));
        assert!(event.is_terminal());
    }

    #[test]
    fn connection_level_uses_sentinel() {
        let event = ErrorEvent::connection(1100, "connectivity lost");
        assert!(event.is_connection_level());
        assert_eq!(event.request_id, CONNECTION_REQUEST_ID);
        assert!(!ErrorEvent::new(3, 1100, "x").is_connection_level());
    }

    #[test]
    fn display_mentions_request_and_code() {
        let event = ErrorEvent::new(12, 200, "No security definition has been found")
            .with_advanced_order_reject("{}");
        assert_eq!(
            event.to_string(),
            "request 12 failed with code 200: No security definition has been found"
        );
        assert_eq!(event.advanced_order_reject.as_deref(), Some("{}"));
    }
}
