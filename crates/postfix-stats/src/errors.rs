// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitStatus;

/// Startup configuration faults. These abort the collector before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("local address tuple requires 3 fields (substring,label,count): {0:?}")]
    LocalTuple(String),

    #[error("local address tuple has an empty substring: {0:?}")]
    EmptyLocalAddress(String),

    #[error("failed to build local address pattern: {0}")]
    LocalPattern(#[from] regex::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to compile {name} pattern: {source}")]
    Pattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Submission failures. Both variants hand the line back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("line queue is full")]
    Rejected(String),

    #[error("line queue is closed")]
    Closed(String),
}

impl SubmitError {
    pub fn into_line(self) -> String {
        match self {
            SubmitError::Rejected(line) | SubmitError::Closed(line) => line,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to send metrics: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve metrics destination {0}")]
    Resolve(String),

    #[error("metrics sink lock poisoned")]
    Poisoned,
}

/// Failure while handling one log line. Never fatal for the worker.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("panicked while processing line: {0}")]
    Panic(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QshapeParseError {
    #[error("qshape produced no output")]
    Empty,

    #[error("qshape header must start with 'T', got {0:?}")]
    BadHeader(String),

    #[error("qshape header has no buckets")]
    NoBuckets,

    #[error("expected {expected} columns, found {found} in row {row:?}")]
    ColumnCount {
        row: String,
        expected: usize,
        found: usize,
    },

    #[error("invalid count {value:?} in row {row:?}")]
    InvalidCount { row: String, value: String },

    #[error("bucket counts do not add up to total {total} in row {row:?}")]
    TotalMismatch { row: String, total: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("failed to run qshape for queue {queue}: {source}")]
    Spawn {
        queue: String,
        #[source]
        source: std::io::Error,
    },

    #[error("qshape for queue {queue} exited with {status}: {stderr}")]
    ExitStatus {
        queue: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("unexpected qshape output for queue {queue}: {source}")]
    Parse {
        queue: String,
        #[source]
        source: QshapeParseError,
    },
}
