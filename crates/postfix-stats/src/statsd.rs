// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Plain StatsD client over UDP.
//!
//! Counters are written as `name:delta|c` and timers as `name:millis|ms`. Batches are packed
//! newline-separated into datagrams no larger than the configured size, the same framing a
//! DogStatsD server splits on.
//!
//! The socket is non-blocking so it can be used from async tasks: a send that would block
//! fails with `WouldBlock` and the batch is dropped and logged by the caller.

use crate::errors::SinkError;
use crate::metric::{MetricEvent, MetricValue, MetricsSink};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
    /// Prepended to every metric name, e.g. `postfix` gives `postfix.messages.bounce`.
    pub prefix: Option<String>,
    pub max_udp_size: usize,
}

#[derive(Debug)]
pub struct StatsdClient {
    socket: UdpSocket,
    prefix: Option<String>,
    max_udp_size: usize,
}

impl StatsdClient {
    pub fn new(config: &StatsdConfig) -> Result<Self, SinkError> {
        let destination = format!("{}:{}", config.host, config.port);
        let target = destination
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SinkError::Resolve(destination.clone()))?;

        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;
        socket.set_nonblocking(true)?;
        debug!("StatsD client sending to {target}");

        Ok(Self {
            socket,
            prefix: config.prefix.clone(),
            max_udp_size: config.max_udp_size,
        })
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    fn format(&self, event: &MetricEvent) -> String {
        let name = self.full_name(&event.name);
        match event.value {
            MetricValue::Count(delta) => format!("{name}:{delta}|c"),
            MetricValue::Timing(elapsed) => format!("{name}:{:.3}|ms", millis(elapsed)),
        }
    }

    fn send_packet(&self, packet: &str) -> Result<(), SinkError> {
        trace!("Sending statsd packet: {packet}");
        self.socket.send(packet.as_bytes())?;
        Ok(())
    }
}

impl MetricsSink for StatsdClient {
    fn increment(&self, name: &str, delta: i64) -> Result<(), SinkError> {
        self.send_packet(&self.format(&MetricEvent::count(name, delta)))
    }

    fn timing(&self, name: &str, elapsed: Duration) -> Result<(), SinkError> {
        self.send_packet(&self.format(&MetricEvent::timing(name, elapsed)))
    }

    fn send_batch(&self, events: Vec<MetricEvent>) -> Result<(), SinkError> {
        let lines: Vec<String> = events.iter().map(|event| self.format(event)).collect();
        for packet in pack(&lines, self.max_udp_size) {
            self.send_packet(&packet)?;
        }
        Ok(())
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Joins lines into newline-separated packets of at most `max_size` bytes.
///
/// A single line longer than `max_size` is sent on its own rather than dropped.
pub(crate) fn pack(lines: &[String], max_size: usize) -> Vec<String> {
    let mut packets = Vec::new();
    let mut current = String::new();

    for line in lines {
        if !current.is_empty() && current.len() + 1 + line.len() > max_size {
            packets.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        packets.push(current);
    }

    packets
}
