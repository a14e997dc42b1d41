// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Postfix statistics collection.
//!
//! Two independent pipelines feed one metrics sink:
//!
//! * log classification: raw syslog lines go through a bounded [`worker_pool::WorkerPool`],
//!   each line is matched against the outer envelope and dispatched to the facility handlers
//!   held by an immutable [`registry::Registry`];
//! * queue sampling: [`sampler::QueueSampler`] runs `qshape` for every Postfix queue and turns
//!   the bucketed age histogram into an "older than" series (see [`qshape`]).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod classifier;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod feeder;
pub mod handlers;
pub mod local_address;
pub mod metric;
pub mod qshape;
pub mod registry;
pub mod sampler;
pub mod statsd;
pub mod util;
pub mod worker_pool;
