//! The transceiver runtime.
//!
//! A link bridges the radio (UDP multicast here) to two bounded queues; an
//! application produces signed broadcasts and consumes peer messages.
//! Offers onto either queue never block: on overflow the message is
//! dropped and logged, so slow validation can never stall the real-time
//! broadcast path.

pub mod application;
pub mod link;
pub mod nav;

pub use application::{Baseline, BlackHat};
pub use link::IpMulticast;

use chrono::{DateTime, Utc};
use std::future::Future;

/// A datagram as handed to the application: time of message receipt plus
/// the raw bytes.
pub type ReceivedDatagram = (DateTime<Utc>, Vec<u8>);

/// Depth of the receive and transmit queues.
pub const QUEUE_DEPTH: usize = 64;

pub trait Link {
    fn run(self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

pub trait Application {
    fn run(self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Drive a link and an application until the link resolves (socket error
/// or shutdown) or the application fails. Outstanding crypto-pool work is
/// discarded on exit; the operations are pure, so nothing needs cleanup.
pub async fn start<L: Link, A: Application>(link: L, application: A) -> anyhow::Result<()> {
    tokio::select! {
        result = link.run() => result,
        result = application.run() => result,
    }
}
