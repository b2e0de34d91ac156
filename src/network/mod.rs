//! Broker side of the pipeline.
//!
//! Workers publish through one shared [`Publisher`], which serializes access
//! to a [`BrokerClient`], retries while the client's outbound queue is full
//! and reconnects with backoff after the link is lost.
//!
//! # Components
//!
//! - `BrokerClient`: the low-level connection contract
//! - `TcpBrokerClient`: publishes length-delimited `RecordFrame`s over TCP
//! - `FrameSink` and `Connection`: the receiving end of that protocol

pub use broker_client::{BrokerClient, SendOutcome};
pub use connection::{Connection, FrameSink};
pub use frame::{RecordFrame, MAX_FRAME_SIZE};
pub use publisher::{
    PublishOutcome, Publisher, PublisherSettings, PublisherState, PublisherStatsSnapshot,
};
pub use tcp_client::TcpBrokerClient;

mod broker_client;
mod connection;
mod frame;
mod publisher;
mod tcp_client;
