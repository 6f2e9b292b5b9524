//! RDM Websocket Adapters
//!
//! - **Codec**: `tr_json2` frame decoding and encoding
//! - **Heartbeat**: keepalive deadline ticker
//! - **Websocket**: `tokio-tungstenite` transport
//! - **Client**: session run loop over any transport

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod websocket;

pub use client::{ClientError, ClientSettings, DumpOptions, RdmClient, RunSummary, StatsReport};
pub use codec::{CodecError, DecodedBatch, JsonCodec};
pub use heartbeat::{DEFAULT_TICK_INTERVAL, KeepAliveEvent, KeepAliveTicker};
pub use websocket::{USER_AGENT, WebSocketTransport};
