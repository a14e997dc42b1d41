// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Postfix queues sampled by `qshape`, in reporting order.
pub const QUEUES: [&str; 5] = ["maildrop", "hold", "incoming", "active", "deferred"];

/// Number of age buckets requested from `qshape` (`-b 12`); the last one is unbounded.
pub const BUCKET_COUNT: usize = 12;

/// Bounded line queue holds this many slots per worker.
pub const QUEUE_SLOTS_PER_WORKER: usize = 1000;

/// Pause before retrying a rejected non-blocking submission.
pub const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Relay substring marking a delivery as received rather than sent.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

pub const DEFAULT_QSHAPE_PATH: &str = "/usr/sbin/qshape";
pub const DEFAULT_STATSD_HOST: &str = "localhost";
pub const DEFAULT_STATSD_PORT: u16 = 8125;
pub const DEFAULT_METRIC_NAMESPACE: &str = "postfix";
pub const DEFAULT_MAX_UDP_SIZE: usize = 512;
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(10);

// Smallest datagram that still fits a realistic metric line
pub const MIN_MAX_UDP_SIZE: usize = 64;

pub const PROCESSING_TIME_METRIC: &str = "qshape.processing_time";
