//! Websocket load generator.
//!
//! Opens a growing population of websocket clients against a server, has every client send
//! fixed-schema order requests at a configured rate, and measures the round trip of each
//! request from the sequence number the server echoes back. Every round is summarized into
//! latency statistics that are logged and appended to a JSON results file.
//!
//! The client side of the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! is implemented on top of a tokio TcpStream: handshake, masked frame writing, frame reading
//! and message reassembly, answering pings and closes.
//!
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
mod frame;
pub mod handshake;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod payload;
pub mod percentile;
pub mod progress;
mod read;
mod request;
pub mod results;
pub mod ring;
pub mod split;
pub mod store;
pub mod timing;
pub mod transport;
mod utils;
mod write;

pub use utils::now_millis;
