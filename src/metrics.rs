use log::{debug, warn};
use std::io;
use tokio::net::UdpSocket;

pub const REQUEST_SEND: &str = "request_send";
pub const RESPONSE_RECEIVED: &str = "response_received";
pub const RESPONSE_TIME: &str = "response_time";
pub const CLIENT_TO_SERVER_TIME: &str = "client_to_server_time";
pub const SERVER_TO_CLIENT_TIME: &str = "server_to_client_time";

/// Receives request timings. Emitting is fire-and-forget, a failing sink never affects a
/// round.
pub trait MetricsSink: Send + Sync {
    fn timing(&self, name: &str, millis: u64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn timing(&self, _name: &str, _millis: u64) {}
}

/// Sends `prefix.name:value|ms` datagrams to a StatsD daemon.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    pub async fn new(address: &str, prefix: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(address).await?;
        debug!("sending metrics to statsd at {}", address);

        Ok(Self {
            socket,
            prefix: prefix.trim_end_matches('.').to_string(),
        })
    }

    pub fn format_timing(&self, name: &str, millis: u64) -> String {
        if self.prefix.is_empty() {
            format!("{}:{}|ms", name, millis)
        } else {
            format!("{}.{}:{}|ms", self.prefix, name, millis)
        }
    }
}

impl MetricsSink for StatsdSink {
    fn timing(&self, name: &str, millis: u64) {
        let line = self.format_timing(name, millis);
        // Called from inside the send loop, a full socket buffer drops the datagram
        if let Err(err) = self.socket.try_send(line.as_bytes()) {
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!("dropping statsd metric {}: {}", name, err);
            }
        }
    }
}
