// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool of line parsers.
//!
//! Lines are queued on a bounded channel holding [`QUEUE_SLOTS_PER_WORKER`] slots per worker.
//! Every worker pulls one line at a time, classifies it and reports the resulting events. A
//! failing line (sink error, panicking handler or sink) is logged and dropped; the worker keeps
//! going.

use crate::classifier::Classifier;
use crate::constants::QUEUE_SLOTS_PER_WORKER;
use crate::errors::{ProcessError, SubmitError};
use crate::metric::MetricsSink;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lines submitted but not yet fully processed.
#[derive(Debug, Default)]
struct Progress {
    pending: AtomicUsize,
    idle: Notify,
}

impl Progress {
    fn begin(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn complete(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct WorkerPool {
    tx: Option<mpsc::Sender<String>>,
    capacity: usize,
    progress: Arc<Progress>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `num_workers` workers. Must be called from within a tokio runtime.
    pub fn new(
        num_workers: usize,
        classifier: Arc<Classifier>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let capacity = num_workers * QUEUE_SLOTS_PER_WORKER;
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(TokioMutex::new(rx));
        let progress = Arc::new(Progress::default());

        let workers = (0..num_workers)
            .map(|id| {
                info!("Starting parser {id}");
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&classifier),
                    Arc::clone(&sink),
                    Arc::clone(&progress),
                ))
            })
            .collect();

        Self {
            tx: Some(tx),
            capacity,
            progress,
            workers,
        }
    }

    /// Queues one line.
    ///
    /// With `blocking` the call waits for a free slot. Without it a full queue fails
    /// immediately with [`SubmitError::Rejected`], handing the line back for a later retry.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the queue untouched.
    pub async fn submit(&self, line: String, blocking: bool) -> Result<(), SubmitError> {
        if !blocking {
            return self.try_submit(line);
        }
        let Some(tx) = &self.tx else {
            return Err(SubmitError::Closed(line));
        };

        let Ok(permit) = tx.reserve().await else {
            return Err(SubmitError::Closed(line));
        };
        self.progress.begin();
        permit.send(line);
        Ok(())
    }

    /// Non-blocking submission.
    pub fn try_submit(&self, line: String) -> Result<(), SubmitError> {
        let Some(tx) = &self.tx else {
            return Err(SubmitError::Closed(line));
        };

        self.progress.begin();
        tx.try_send(line).map_err(|e| {
            self.progress.complete();
            match e {
                mpsc::error::TrySendError::Full(line) => SubmitError::Rejected(line),
                mpsc::error::TrySendError::Closed(line) => SubmitError::Closed(line),
            }
        })
    }

    /// Waits until every line submitted before this call has been processed.
    pub async fn drain(&self) {
        self.progress.wait_idle().await;
    }

    /// Closes the queue and waits for the workers to finish what is left in it.
    pub async fn shutdown(mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Parser task failed: {e}");
            }
        }
        debug!("Parser pool stopped");
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Lines queued or in flight.
    pub fn pending(&self) -> usize {
        self.progress.pending()
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<TokioMutex<mpsc::Receiver<String>>>,
    classifier: Arc<Classifier>,
    sink: Arc<dyn MetricsSink>,
    progress: Arc<Progress>,
) {
    loop {
        let line = { rx.lock().await.recv().await };
        let Some(line) = line else {
            break;
        };

        if let Err(e) = process_line(&classifier, sink.as_ref(), &line) {
            error!(parser = id, "Error parsing line: {line}: {e}");
        }
        progress.complete();
    }
    debug!("Parser {id} stopped");
}

/// Classifies one line and reports its events. A panic in a handler or in the sink is turned
/// into an error so the worker survives it.
pub fn process_line(
    classifier: &Classifier,
    sink: &dyn MetricsSink,
    line: &str,
) -> Result<(), ProcessError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let events = classifier.classify(line);
        if events.is_empty() {
            return Ok(());
        }
        sink.send_batch(events)
    }))
    .map_err(|payload| ProcessError::Panic(panic_message(payload.as_ref())))??;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
