// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outer syslog envelope of a Postfix log line.

use crate::errors::RegistryError;
use regex::Regex;

// Traditional syslog stamp ("Jan  5 10:00:01") or RFC 3339 ("2024-01-05T10:00:01.123+00:00")
const ENVELOPE_PATTERN: &str = r"\A(?P<timestamp>\D{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}|\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(?P<source>.+?)\s+(?P<process>.+?)\[(?P<pid>\d+?)\]:\s(?P<body>.*)\z";

/// Fields of one matched line. Borrows from the line and lives only until dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub timestamp: &'a str,
    pub source: &'a str,
    /// Raw process token, e.g. `postfix/submission/smtpd`.
    pub process: &'a str,
    /// Last `/` segment of the process token, e.g. `smtpd`.
    pub facility: &'a str,
    /// Process id as logged; never parsed so any width is accepted.
    pub pid: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Clone)]
pub struct EnvelopeParser {
    pattern: Regex,
}

impl EnvelopeParser {
    pub fn new() -> Result<Self, RegistryError> {
        let pattern = Regex::new(ENVELOPE_PATTERN).map_err(|source| RegistryError::Pattern {
            name: "envelope",
            source,
        })?;
        Ok(Self { pattern })
    }

    /// Returns `None` for lines that are not Postfix syslog entries (continuations, other
    /// daemons' output, garbage).
    pub fn parse<'a>(&self, line: &'a str) -> Option<Envelope<'a>> {
        let captures = self.pattern.captures(line)?;

        let process = captures.name("process")?.as_str();
        let facility = process.rsplit('/').next().unwrap_or(process);

        Some(Envelope {
            timestamp: captures.name("timestamp")?.as_str(),
            source: captures.name("source")?.as_str(),
            process,
            facility,
            pid: captures.name("pid")?.as_str(),
            body: captures.name("body")?.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> EnvelopeParser {
        EnvelopeParser::new().expect("envelope pattern compiles")
    }

    #[test]
    fn test_parse_syslog_line() {
        let line = "Jan  5 10:00:01 mail01 postfix/smtp[12345]: 3F2A81C0B: to=<a@example.com>, status=sent";
        let envelope = parser().parse(line).expect("line matches");

        assert_eq!(envelope.timestamp, "Jan  5 10:00:01");
        assert_eq!(envelope.source, "mail01");
        assert_eq!(envelope.process, "postfix/smtp");
        assert_eq!(envelope.facility, "smtp");
        assert_eq!(envelope.pid, "12345");
        assert_eq!(
            envelope.body,
            "3F2A81C0B: to=<a@example.com>, status=sent"
        );
    }

    #[test]
    fn test_parse_rfc3339_line() {
        let line = "2024-01-05T10:00:01.123456+00:00 mail01 postfix/qmgr[99]: 3F2A81C0B: removed";
        let envelope = parser().parse(line).expect("line matches");

        assert_eq!(envelope.timestamp, "2024-01-05T10:00:01.123456+00:00");
        assert_eq!(envelope.facility, "qmgr");
        assert_eq!(envelope.body, "3F2A81C0B: removed");
    }

    #[test]
    fn test_facility_is_last_segment() {
        let line = "Feb 11 08:15:00 mx postfix/submission/smtpd[7]: 1A2B3C: client=host[10.0.0.1]";
        let envelope = parser().parse(line).expect("line matches");

        assert_eq!(envelope.process, "postfix/submission/smtpd");
        assert_eq!(envelope.facility, "smtpd");
    }

    #[test]
    fn test_facility_without_slash() {
        let line = "Feb 11 08:15:00 mx smtpd[7]: connect from host[10.0.0.1]";
        let envelope = parser().parse(line).expect("line matches");

        assert_eq!(envelope.facility, "smtpd");
    }

    #[test]
    fn test_pid_wider_than_u32() {
        let line = "Jan  5 10:00:01 mail01 postfix/bounce[98765432109876]: 3F2A81C0B: sender non-delivery notification: 5C1D71C0D";
        let envelope = parser().parse(line).expect("line matches");

        assert_eq!(envelope.pid, "98765432109876");
        assert_eq!(envelope.facility, "bounce");
    }

    #[test]
    fn test_non_matching_lines() {
        let parser = parser();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("garbage").is_none());
        assert!(parser
            .parse("    continuation of a previous line")
            .is_none());
        // missing pid
        assert!(parser
            .parse("Jan  5 10:00:01 mail01 postfix/smtp: 3F2A81C0B: removed")
            .is_none());
    }
}
