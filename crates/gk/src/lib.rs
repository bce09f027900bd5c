//! The flow-dispatch engine (GK): a sharded packet processor running one
//! instance per worker core. Each instance owns a disjoint partition of
//! the flow space, keyed by the NIC's RSS hash, and runs a three-state
//! admission machine per flow. Policy decisions arrive asynchronously on
//! per-shard mailboxes; the RSS redirection table guarantees a flow's
//! packets and its policies converge on the same shard, so no entry is
//! ever shared between threads.

mod table;
pub use table::{FlowTable, TableFull};

mod flow;
pub use flow::{
    priority_from_delta_time, process_packet, Declined, Disposition, FlowEntry, FlowState,
    Granted, Request, PRIORITY_GRANTED, PRIORITY_MAX, PRIORITY_RENEW_CAP, START_ALLOWANCE,
    START_PRIORITY,
};

mod policy;
pub use policy::{apply_policy, GkCmd, Policy, PolicyAction};

mod instance;
pub use instance::{GkInstance, GK_CMD_BURST_SIZE, MAX_PKT_BURST};

mod router;
pub use router::responsible_mailbox;

mod config;
pub use config::{setup_gk, spawn_gk, GkConfig, GkShared, InstanceHandle};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the back interface is required but not enabled")]
    BackRequired,
    #[error("GK requires at least one worker")]
    NoWorkers,
}
