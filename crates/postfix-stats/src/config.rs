// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_MAX_UDP_SIZE, DEFAULT_METRIC_NAMESPACE, DEFAULT_QSHAPE_PATH,
    DEFAULT_SAMPLING_INTERVAL, DEFAULT_STATSD_HOST, DEFAULT_STATSD_PORT, MIN_MAX_UDP_SIZE,
};
use crate::errors::ConfigError;
use crate::feeder::LineSource;
use crate::local_address::LocalAddressClassifier;
use crate::sampler::QshapeCommand;
use crate::statsd::StatsdConfig;
use crate::util::parse_metric_namespace;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the collector (log parsing, qshape sampling and the StatsD sink)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Number of line parser workers
    pub concurrency: usize,
    /// Local address tuples, `substring,label,count`
    pub local_addresses: Vec<String>,
    /// Delay between two qshape samples
    pub sampling_interval: Duration,
    /// Sample the queues once and stop
    pub run_once: bool,
    pub skip_qshape: bool,
    pub skip_log_parser: bool,
    /// Log files to parse; empty or `-` reads standard input
    pub log_files: Vec<String>,
    /// Path to the `qshape` executable
    pub qshape_path: PathBuf,
    /// How many top domains qshape reports separately
    pub top_domains: usize,
    pub statsd_host: String,
    pub statsd_port: u16,
    /// Prefix for every metric name, `None` sends bare names
    pub metric_namespace: Option<String>,
    /// Largest datagram the StatsD client sends
    pub max_udp_size: usize,
    /// Explicit log level; when unset the verbosity flag decides
    pub log_level: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1),
            local_addresses: Vec::new(),
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            run_once: false,
            skip_qshape: false,
            skip_log_parser: false,
            log_files: Vec::new(),
            qshape_path: PathBuf::from(DEFAULT_QSHAPE_PATH),
            top_domains: 0,
            statsd_host: DEFAULT_STATSD_HOST.to_string(),
            statsd_port: DEFAULT_STATSD_PORT,
            metric_namespace: Some(DEFAULT_METRIC_NAMESPACE.to_string()),
            max_udp_size: DEFAULT_MAX_UDP_SIZE,
            log_level: None,
        }
    }
}

impl CollectorConfig {
    /// Create configuration from environment variables. Values that fail to parse keep their
    /// defaults. Call [`CollectorConfig::validate`] once command line overrides are applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`CollectorConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let statsd_host = lookup("STATSD_HOST")
            .map(|host| host.trim().to_string())
            .unwrap_or(defaults.statsd_host);
        let statsd_port = lookup("STATSD_PORT")
            .and_then(|port| port.trim().parse::<u16>().ok())
            .unwrap_or(defaults.statsd_port);
        // An empty STATSD_PREFIX disables the prefix
        let metric_namespace = match lookup("STATSD_PREFIX") {
            Some(prefix) => parse_metric_namespace(&prefix),
            None => defaults.metric_namespace,
        };
        let max_udp_size = lookup("STATSD_MAXUDPSIZE")
            .and_then(|size| size.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_udp_size);
        let sampling_interval = lookup("STATSD_DELAY")
            .and_then(|delay| delay.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.sampling_interval);
        let qshape_path = lookup("POSTFIX_STATS_QSHAPE")
            .map(PathBuf::from)
            .unwrap_or(defaults.qshape_path);
        let top_domains = lookup("POSTFIX_STATS_TOP_DOMAINS")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(defaults.top_domains);
        let log_level = lookup("POSTFIX_STATS_LOG_LEVEL").map(|level| level.trim().to_lowercase());

        Self {
            statsd_host,
            statsd_port,
            metric_namespace,
            max_udp_size,
            sampling_interval,
            qshape_path,
            top_domains,
            log_level,
            ..defaults
        }
    }

    /// Validate the configuration, including every local address tuple
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if self.statsd_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "StatsD port must be greater than 0".to_string(),
            ));
        }

        if self.statsd_host.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "STATSD_HOST cannot be empty".to_string(),
            ));
        }

        if self.sampling_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "STATSD_DELAY must be greater than 0".to_string(),
            ));
        }

        if self.max_udp_size < MIN_MAX_UDP_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "STATSD_MAXUDPSIZE must be at least {MIN_MAX_UDP_SIZE}, got {}",
                self.max_udp_size
            )));
        }

        if let Some(level) = &self.log_level {
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
                )));
            }
        }

        self.local_address_classifier()?;
        Ok(())
    }

    pub fn local_address_classifier(&self) -> Result<LocalAddressClassifier, ConfigError> {
        LocalAddressClassifier::from_tuples(&self.local_addresses)
    }

    pub fn statsd_config(&self) -> StatsdConfig {
        StatsdConfig {
            host: self.statsd_host.clone(),
            port: self.statsd_port,
            prefix: self.metric_namespace.clone(),
            max_udp_size: self.max_udp_size,
        }
    }

    pub fn line_source(&self) -> LineSource {
        LineSource::from_args(&self.log_files)
    }

    pub fn qshape_command(&self) -> QshapeCommand {
        QshapeCommand::new(self.qshape_path.clone(), self.top_domains)
    }
}
