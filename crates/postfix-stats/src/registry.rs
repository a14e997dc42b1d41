// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Facility to handler lookup table.
//!
//! The table is assembled once with [`RegistryBuilder`] and is read-only afterwards, so workers
//! share it through an `Arc` without locking.

use crate::errors::RegistryError;
use crate::handlers::{HandlerDescriptor, HandlerKind};
use fnv::FnvHashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    by_facility: FnvHashMap<String, Vec<Arc<HandlerDescriptor>>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under each of its own facilities.
    pub fn register(&mut self, descriptor: Arc<HandlerDescriptor>) -> &mut Self {
        let facilities = descriptor.facilities();
        self.register_under(descriptor, facilities)
    }

    /// Registers `descriptor` under `facilities`. A facility that already lists a handler of
    /// the same kind is left unchanged.
    pub fn register_under(
        &mut self,
        descriptor: Arc<HandlerDescriptor>,
        facilities: &[&str],
    ) -> &mut Self {
        for facility in facilities {
            let handlers = self.by_facility.entry((*facility).to_string()).or_default();
            if handlers.iter().any(|h| h.kind() == descriptor.kind()) {
                continue;
            }
            debug!(
                "Registering {} handler for facility {facility}",
                descriptor.kind().name()
            );
            handlers.push(Arc::clone(&descriptor));
        }
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            by_facility: self.by_facility,
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    by_facility: FnvHashMap<String, Vec<Arc<HandlerDescriptor>>>,
}

impl Registry {
    /// Registry holding every built-in handler.
    pub fn with_default_handlers() -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();
        for kind in HandlerKind::ALL {
            builder.register(Arc::new(HandlerDescriptor::new(kind)?));
        }
        Ok(builder.build())
    }

    /// Handlers for `facility` in registration order; empty for unknown facilities.
    pub fn handlers(&self, facility: &str) -> &[Arc<HandlerDescriptor>] {
        self.by_facility
            .get(facility)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn facilities(&self) -> impl Iterator<Item = &str> {
        self.by_facility.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_facility.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(registry: &Registry, facility: &str) -> Vec<HandlerKind> {
        registry
            .handlers(facility)
            .iter()
            .map(|h| h.kind())
            .collect()
    }

    #[test]
    fn test_default_registry() {
        let registry = Registry::with_default_handlers().unwrap();

        let mut facilities: Vec<&str> = registry.facilities().collect();
        facilities.sort_unstable();
        assert_eq!(
            facilities,
            vec!["bounce", "cleanup", "error", "local", "qmgr", "smtp", "smtpd"]
        );
        assert_eq!(kinds(&registry, "smtp"), vec![HandlerKind::Smtp]);
        assert_eq!(kinds(&registry, "error"), vec![HandlerKind::Smtp]);
        assert!(registry.handlers("pickup").is_empty());
    }

    #[test]
    fn test_shared_descriptor_across_facilities() {
        let registry = Registry::with_default_handlers().unwrap();

        let smtp = &registry.handlers("smtp")[0];
        let error = &registry.handlers("error")[0];
        assert!(Arc::ptr_eq(smtp, error));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let smtp = Arc::new(HandlerDescriptor::new(HandlerKind::Smtp).unwrap());
        let mut builder = RegistryBuilder::new();
        builder
            .register(Arc::clone(&smtp))
            .register(Arc::clone(&smtp))
            .register(Arc::new(HandlerDescriptor::new(HandlerKind::Smtp).unwrap()));
        let registry = builder.build();

        assert_eq!(registry.handlers("smtp").len(), 1);
        assert_eq!(registry.handlers("error").len(), 1);
    }

    #[test]
    fn test_facility_keeps_registration_order() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_under(
                Arc::new(HandlerDescriptor::new(HandlerKind::Qmgr).unwrap()),
                &["custom"],
            )
            .register_under(
                Arc::new(HandlerDescriptor::new(HandlerKind::Bounce).unwrap()),
                &["custom"],
            );
        let registry = builder.build();

        assert_eq!(
            kinds(&registry, "custom"),
            vec![HandlerKind::Qmgr, HandlerKind::Bounce]
        );
    }

    #[test]
    fn test_empty_builder() {
        assert!(RegistryBuilder::new().build().is_empty());
    }
}
