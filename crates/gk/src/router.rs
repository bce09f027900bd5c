//! Shard routing for policy producers: a flow's RSS hash, taken through
//! the same redirection table the NIC dispatches with, names the one
//! shard whose table will ever hold that flow. Policies sent to that
//! shard's mailbox and packets of the flow converge on a single thread.

use crate::{GkCmd, GkShared};
use mailbox::MailboxSender;
use net::FlowKey;

/// The mailbox of the shard that owns `flow`, or None (logged) when no
/// instance serves the reta-selected queue, which is a misconfiguration.
pub fn responsible_mailbox<'s>(
    flow: &FlowKey,
    shared: &'s GkShared,
) -> Option<&'s MailboxSender<GkCmd>> {
    let queue = shared.rss.queue_for_hash(flow.rss_hash());

    match shared
        .instances
        .iter()
        .find(|instance| instance.rx_queue_front == queue)
    {
        Some(instance) => Some(&instance.mailbox),
        None => {
            tracing::error!(queue, "gk: wrong RSS configuration for GK blocks");
            None
        }
    }
}
