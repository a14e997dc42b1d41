// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Small helpers shared by metric naming and configuration parsing.

/// Values accepted as "true" in local address tuples, compared case-insensitively.
const TRUTHY_VALUES: [&str; 3] = ["yes", "1", "true"];

/// Parses and validates the StatsD metric prefix.
///
/// A valid namespace must:
/// - Start with an ASCII letter
/// - Contain only ASCII alphanumerics, underscores, or periods
/// - Not be empty or contain only whitespace
///
/// Whitespace is trimmed and a trailing period is dropped, so `postfix.` and `postfix`
/// produce the same metric names.
///
/// # Examples
///
/// ```
/// use postfix_stats::util::parse_metric_namespace;
///
/// assert_eq!(parse_metric_namespace("postfix"), Some("postfix".to_string()));
/// assert_eq!(parse_metric_namespace("mail.postfix."), Some("mail.postfix".to_string()));
/// assert_eq!(parse_metric_namespace("1invalid"), None);
/// assert_eq!(parse_metric_namespace("my-app"), None);
/// ```
pub fn parse_metric_namespace(namespace: &str) -> Option<String> {
    let trimmed = namespace.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    let mut chars = trimmed.chars();

    if let Some(first_char) = chars.next() {
        if !first_char.is_ascii_alphabetic() {
            tracing::error!(
                "STATSD_PREFIX must start with a letter, got: '{}'. Ignoring prefix.",
                trimmed
            );
            return None;
        }
    } else {
        return None;
    }

    if let Some(invalid_char) =
        chars.find(|&ch| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.')
    {
        tracing::error!(
            "STATSD_PREFIX contains invalid character '{}' in '{}'. Only ASCII alphanumerics, underscores, and periods are allowed. Ignoring prefix.",
            invalid_char, trimmed
        );
        return None;
    }

    Some(trimmed.to_string())
}

/// Turns a dotted value (DSN code, domain name) into a single metric path segment.
///
/// StatsD backends treat `.` as a hierarchy separator, so `5.4.4` becomes `5_4_4`.
pub fn metric_segment(value: &str) -> String {
    value.replace('.', "_")
}

pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    TRUTHY_VALUES
        .iter()
        .any(|truthy| truthy.eq_ignore_ascii_case(value))
}
