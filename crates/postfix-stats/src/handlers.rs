// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Facility handlers: one body pattern per Postfix message shape and the metrics it yields.

use crate::constants::LOOPBACK_ADDRESS;
use crate::errors::RegistryError;
use crate::local_address::LocalAddressClassifier;
use crate::metric::MetricEvent;
use crate::util::metric_segment;
use regex::{Captures, Regex};
use tracing::{debug, trace};

const BOUNCE_PATTERN: &str =
    r"\A(?P<message_id>\w+?): sender non-delivery notification: (?P<bounce_message_id>\w+?)\z";

const CLEANUP_PATTERN: &str = r"\A(?P<message_id>\w+?): message-id=<(?P<ext_message_id>.+?)>\z";

const LOCAL_PATTERN: &str = r"\A(?P<message_id>\w+?): to=<(?P<to_email>.*?)>, orig_to=<(?P<orig_to_email>.*?)>, relay=(?P<relay>.+?), delay=(?P<delay>[0-9.]+), delays=(?P<delays>[0-9./]+), dsn=(?P<dsn>[0-9.]+), status=(?P<status>\w+) \((?P<response>.+?)\)\z";

const QMGR_PATTERN: &str = r"\A(?P<message_id>\w+?): (?:(?P<removed>removed)|(?:from=<(?P<from_address>.*?)>, size=(?P<size>[0-9]+), nrcpt=(?P<nrcpt>[0-9]+) \(queue (?P<queue>[a-z]+)\)))?\z";

const SMTP_PATTERN: &str = r"\A(?P<message_id>\w+?): to=<(?P<to_email>.+?)>, relay=(?P<relay>.+?), (?:conn_use=(?P<conn_use>\d+), )?delay=(?P<delay>[0-9.]+), delays=(?P<delays>[0-9./]+), dsn=(?P<dsn>[0-9.]+), status=(?P<status>\w+) \((?P<response>.+?)\)\z";

const SMTPD_PATTERN: &str = r"\A(?P<message_id>\w+?): client=(?P<client_hostname>[.\w-]+)\[(?P<client_ip>[A-Fa-f0-9.:]{3,39})\](?:, sasl_method=[\w-]+)?(?:, sasl_username=[-_.@\w]+)?(?:, sasl_sender=\S*)?(?:, orig_queue_id=\w+)?(?:, orig_client=(?P<orig_client_hostname>[.\w-]+)\[(?P<orig_client_ip>[A-Fa-f0-9.:]{3,39})\])?\z";

/// The closed set of handlers, one per facility/message shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Bounce,
    Cleanup,
    Local,
    /// Matches queue manager lines but reports nothing yet; reserved for queue depth metrics.
    Qmgr,
    Smtp,
    Smtpd,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 6] = [
        HandlerKind::Bounce,
        HandlerKind::Cleanup,
        HandlerKind::Local,
        HandlerKind::Qmgr,
        HandlerKind::Smtp,
        HandlerKind::Smtpd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HandlerKind::Bounce => "bounce",
            HandlerKind::Cleanup => "cleanup",
            HandlerKind::Local => "local",
            HandlerKind::Qmgr => "qmgr",
            HandlerKind::Smtp => "smtp",
            HandlerKind::Smtpd => "smtpd",
        }
    }

    /// Facilities this handler registers under by default.
    pub fn facilities(self) -> &'static [&'static str] {
        match self {
            HandlerKind::Bounce => &["bounce"],
            HandlerKind::Cleanup => &["cleanup"],
            HandlerKind::Local => &["local"],
            HandlerKind::Qmgr => &["qmgr"],
            HandlerKind::Smtp => &["smtp", "error"],
            HandlerKind::Smtpd => &["smtpd"],
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            HandlerKind::Bounce => BOUNCE_PATTERN,
            HandlerKind::Cleanup => CLEANUP_PATTERN,
            HandlerKind::Local => LOCAL_PATTERN,
            HandlerKind::Qmgr => QMGR_PATTERN,
            HandlerKind::Smtp => SMTP_PATTERN,
            HandlerKind::Smtpd => SMTPD_PATTERN,
        }
    }
}

/// A compiled handler: its kind plus the body pattern.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    kind: HandlerKind,
    pattern: Regex,
}

impl HandlerDescriptor {
    pub fn new(kind: HandlerKind) -> Result<Self, RegistryError> {
        let pattern = Regex::new(kind.pattern()).map_err(|source| RegistryError::Pattern {
            name: kind.name(),
            source,
        })?;
        Ok(Self { kind, pattern })
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn facilities(&self) -> &'static [&'static str] {
        self.kind.facilities()
    }

    /// Matches `body` and returns the events it yields, or `None` if the body has another shape.
    pub fn handle(
        &self,
        body: &str,
        local_addresses: &LocalAddressClassifier,
    ) -> Option<Vec<MetricEvent>> {
        let captures = self.pattern.captures(body)?;
        trace!(handler = self.kind.name(), "Matched body: {body}");
        Some(self.emit(&captures, local_addresses))
    }

    fn emit(
        &self,
        captures: &Captures<'_>,
        local_addresses: &LocalAddressClassifier,
    ) -> Vec<MetricEvent> {
        match self.kind {
            HandlerKind::Bounce => vec![MetricEvent::count("messages.bounce", 1)],
            HandlerKind::Cleanup => vec![MetricEvent::count("messages.cleanup", 1)],
            HandlerKind::Local => {
                let to = field(captures, "to_email");
                let Some(entry) = local_addresses.classify(to) else {
                    return Vec::new();
                };
                debug!(
                    "Local address <{}> count ({}) as \"{}\"",
                    entry.match_key, entry.count_in_status, entry.label
                );

                let mut events = vec![MetricEvent::count("messages.local", 1)];
                if entry.count_in_status {
                    events.extend(delivery_events("in", captures));
                }
                events
            }
            HandlerKind::Qmgr => Vec::new(),
            HandlerKind::Smtp => {
                let direction = if field(captures, "relay").contains(LOOPBACK_ADDRESS) {
                    "recv"
                } else {
                    "send"
                };
                delivery_events(direction, captures).into()
            }
            HandlerKind::Smtpd => vec![MetricEvent::count("messages.smtpd", 1)],
        }
    }
}

fn field<'h>(captures: &Captures<'h>, name: &str) -> &'h str {
    captures.name(name).map_or("", |m| m.as_str())
}

/// `messages.<direction>.status.<status>` and `messages.<direction>.resp_codes.<dsn>`.
fn delivery_events(direction: &str, captures: &Captures<'_>) -> [MetricEvent; 2] {
    let status = field(captures, "status");
    let dsn = metric_segment(field(captures, "dsn"));
    [
        MetricEvent::count(format!("messages.{direction}.status.{status}"), 1),
        MetricEvent::count(format!("messages.{direction}.resp_codes.{dsn}"), 1),
    ]
}
