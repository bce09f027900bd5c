//! Network foundation for the dataplane: flow keys and their RSS hash,
//! packet buffers, wire-format helpers, IP-in-IP encapsulation, interface
//! configuration, and the poll-mode port abstraction.

mod flow;
pub use flow::{toeplitz_hash, FlowKey, RSS_KEY};

mod packet;
pub use packet::Packet;

pub mod wire;
pub use wire::Mac;

mod encap;
pub use encap::{encapsulate, frame_dscp, Endpoints, TunnelInfo};

mod iface;
pub use iface::{Iface, IfaceConfig, IfaceSide, NetConfig, QueueAllocator};

mod port;
pub use port::{LoopbackPort, PollPort, QueueId};

mod rss;
pub use rss::{RssConf, RETA_SIZE};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The frame is not IPv4 or IPv6, or is truncated below its own headers.
    /// This is a hot-path condition: callers drop without logging.
    #[error("frame is not a well-formed IP packet")]
    NotIp,
    #[error("frame is truncated ({len} bytes, need {need})")]
    Truncated { len: usize, need: usize },
    #[error("packet cannot be encapsulated: {0}")]
    Encap(&'static str),
    #[error("no {0} address is configured on interface")]
    Unaddressed(&'static str),
}
