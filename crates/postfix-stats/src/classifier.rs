// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-line classification, independent of any concurrency.

use crate::envelope::EnvelopeParser;
use crate::errors::RegistryError;
use crate::local_address::LocalAddressClassifier;
use crate::metric::MetricEvent;
use crate::registry::Registry;
use tracing::trace;

/// Immutable classification state shared by all workers.
#[derive(Debug)]
pub struct Classifier {
    envelope: EnvelopeParser,
    registry: Registry,
    local_addresses: LocalAddressClassifier,
}

impl Classifier {
    pub fn new(
        registry: Registry,
        local_addresses: LocalAddressClassifier,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            envelope: EnvelopeParser::new()?,
            registry,
            local_addresses,
        })
    }

    /// Classifier with every built-in handler.
    pub fn with_default_handlers(
        local_addresses: LocalAddressClassifier,
    ) -> Result<Self, RegistryError> {
        Self::new(Registry::with_default_handlers()?, local_addresses)
    }

    /// Metrics produced by one raw log line. Lines that are not Postfix entries yield nothing.
    pub fn classify(&self, line: &str) -> Vec<MetricEvent> {
        let Some(envelope) = self.envelope.parse(line) else {
            trace!("Skipping unrecognized line: {line}");
            return Vec::new();
        };
        trace!(
            facility = envelope.facility,
            pid = envelope.pid,
            source = envelope.source,
            "Parsed envelope"
        );
        self.dispatch(envelope.facility, envelope.body)
    }

    /// Runs every handler registered for `facility` against `body`.
    pub fn dispatch(&self, facility: &str, body: &str) -> Vec<MetricEvent> {
        self.registry
            .handlers(facility)
            .iter()
            .filter_map(|handler| handler.handle(body, &self.local_addresses))
            .flatten()
            .collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
