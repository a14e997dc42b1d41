// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic queue sampling.
//!
//! Every tick runs `qshape` once per queue, converts each table into older-than counters and
//! ships the whole pass as a single batch, followed by the time the pass took.

use crate::constants::{BUCKET_COUNT, PROCESSING_TIME_METRIC, QUEUES};
use crate::errors::{SamplerError, SinkError};
use crate::metric::{MetricEvent, MetricsSink};
use crate::qshape::{parse_qshape, queue_metrics};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Source of raw `qshape` tables.
#[async_trait]
pub trait QueueInspector: Send + Sync {
    async fn inspect(&self, queue: &str) -> Result<String, SamplerError>;
}

/// Runs `<program> -n <top_domains> -b 12 <queue>`.
#[derive(Debug, Clone)]
pub struct QshapeCommand {
    program: PathBuf,
    top_domains: usize,
}

impl QshapeCommand {
    pub fn new(program: impl Into<PathBuf>, top_domains: usize) -> Self {
        Self {
            program: program.into(),
            top_domains,
        }
    }
}

#[async_trait]
impl QueueInspector for QshapeCommand {
    async fn inspect(&self, queue: &str) -> Result<String, SamplerError> {
        let output = Command::new(&self.program)
            .arg("-n")
            .arg(self.top_domains.to_string())
            .arg("-b")
            .arg(BUCKET_COUNT.to_string())
            .arg(queue)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SamplerError::Spawn {
                queue: queue.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SamplerError::ExitStatus {
                queue: queue.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub struct QueueSampler {
    inspector: Arc<dyn QueueInspector>,
    sink: Arc<dyn MetricsSink>,
}

impl QueueSampler {
    pub fn new(inspector: Arc<dyn QueueInspector>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { inspector, sink }
    }

    /// One sampling pass over every queue.
    ///
    /// A queue whose `qshape` run fails or prints an unexpected table is logged and left out.
    /// The `qshape.processing_time` timer is always the last event.
    pub async fn sample(&self) -> Vec<MetricEvent> {
        let started = Instant::now();
        let mut events = Vec::new();

        for queue in QUEUES {
            debug!("Working on qshape queue: {queue}");
            match self.sample_queue(queue).await {
                Ok(queue_events) => events.extend(queue_events),
                Err(e) => error!("Skipping qshape queue: {e}"),
            }
        }

        events.push(MetricEvent::timing(
            PROCESSING_TIME_METRIC,
            started.elapsed(),
        ));
        events
    }

    async fn sample_queue(&self, queue: &str) -> Result<Vec<MetricEvent>, SamplerError> {
        let output = self.inspector.inspect(queue).await?;
        let shape = parse_qshape(&output).map_err(|source| SamplerError::Parse {
            queue: queue.to_string(),
            source,
        })?;
        Ok(queue_metrics(queue, &shape))
    }

    /// Samples and ships the pass as one batch. Returns the number of events sent.
    pub async fn report(&self) -> Result<usize, SinkError> {
        let events = self.sample().await;
        let sent = events.len();
        self.sink.send_batch(events)?;
        Ok(sent)
    }

    async fn report_logged(&self) {
        match self.report().await {
            Ok(sent) => debug!("Reported {sent} qshape metrics"),
            Err(e) => error!("Failed to report qshape metrics: {e}"),
        }
    }

    /// Reports immediately, then every `period` until `cancel` fires. With `run_once` only the
    /// first report is made. A report in progress always completes before the loop exits.
    pub async fn run(&self, period: Duration, run_once: bool, cancel: CancellationToken) {
        info!("Starting qshape processing");
        self.report_logged().await;

        if !run_once {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.report_logged().await,
                }
            }
        }
        info!("Finished qshape processing");
    }
}
