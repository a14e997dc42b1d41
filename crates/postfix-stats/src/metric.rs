// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric events and the sink abstraction both pipelines report into.

use crate::errors::SinkError;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    /// Counter delta.
    Count(i64),
    /// Timer sample, only used for `qshape.processing_time`.
    Timing(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: String,
    pub value: MetricValue,
}

impl MetricEvent {
    pub fn count(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Count(delta),
        }
    }

    pub fn timing(name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Timing(elapsed),
        }
    }
}

/// Destination for metric events.
///
/// Implementations are shared between the worker pool and the queue sampler, so they must be
/// safe for concurrent use.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, delta: i64) -> Result<(), SinkError>;

    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), SinkError>;

    /// Ships a batch of events together. The default sends them one by one.
    fn send_batch(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        for event in events {
            match event.value {
                MetricValue::Count(delta) => self.increment(&event.name, delta)?,
                MetricValue::Timing(elapsed) => self.timing(&event.name, elapsed)?,
            }
        }
        Ok(())
    }
}

/// In-memory sink summing counters by name.
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: Mutex<FnvHashMap<String, i64>>,
    timings: Mutex<FnvHashMap<String, Vec<Duration>>>,
    batches: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters().get(name).copied()
    }

    pub fn counters(&self) -> FnvHashMap<String, i64> {
        match self.counters.lock() {
            Ok(counters) => counters.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn timings(&self, name: &str) -> Vec<Duration> {
        match self.timings.lock() {
            Ok(timings) => timings.get(name).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned().unwrap_or_default(),
        }
    }

    /// Number of `send_batch` calls received.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Acquire)
    }
}

impl MetricsSink for RecordingSink {
    fn increment(&self, name: &str, delta: i64) -> Result<(), SinkError> {
        let mut counters = self.counters.lock().map_err(|_| SinkError::Poisoned)?;
        *counters.entry(name.to_string()).or_insert(0) += delta;
        Ok(())
    }

    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), SinkError> {
        let mut timings = self.timings.lock().map_err(|_| SinkError::Poisoned)?;
        timings.entry(name.to_string()).or_default().push(elapsed);
        Ok(())
    }

    fn send_batch(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        self.batches.fetch_add(1, Ordering::AcqRel);
        for event in events {
            match event.value {
                MetricValue::Count(delta) => self.increment(&event.name, delta)?,
                MetricValue::Timing(elapsed) => self.timing(&event.name, elapsed)?,
            }
        }
        Ok(())
    }
}
