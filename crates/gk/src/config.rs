//! GK block configuration, staged setup, and worker spawn. The shared
//! state lives behind an `Arc`: every worker holds a reference for its
//! lifetime, and the last one out frees the lot.

use crate::{Error, GkCmd, GkInstance};
use clock::Clock;
use lls::LlsHandle;
use mailbox::MailboxSender;
use net::{
    Endpoints, NetConfig, PollPort, QueueAllocator, QueueId, RssConf, TunnelInfo,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone)]
pub struct GkConfig {
    /// Flows each shard's table can hold.
    pub flow_ht_size: usize,
    /// Worker cores, one shard each.
    pub num_workers: usize,
}

/// The producer-visible face of one shard.
pub struct InstanceHandle {
    pub rx_queue_front: QueueId,
    pub tx_queue_back: QueueId,
    pub mailbox: MailboxSender<GkCmd>,
}

/// State shared by all GK workers and by policy producers.
pub struct GkShared {
    pub net: NetConfig,
    pub clock: Arc<Clock>,
    pub front: Arc<dyn PollPort>,
    pub back: Arc<dyn PollPort>,
    pub lls: LlsHandle,
    pub exiting: Arc<AtomicBool>,
    pub rss: RssConf,
    pub tunnel: TunnelInfo,
    pub instances: Vec<InstanceHandle>,
}

/// Stage the GK block: assign queues, build each shard's table and
/// mailbox, and derive the RSS redirection table the shard router and the
/// NIC both use.
#[allow(clippy::too_many_arguments)]
pub fn setup_gk(
    config: &GkConfig,
    net: NetConfig,
    clock: Arc<Clock>,
    front: Arc<dyn PollPort>,
    back: Arc<dyn PollPort>,
    lls: LlsHandle,
    exiting: Arc<AtomicBool>,
    front_queues: &mut QueueAllocator,
    back_queues: &mut QueueAllocator,
) -> Result<(GkShared, Vec<GkInstance>), Error> {
    if !net.back_enabled {
        return Err(Error::BackRequired);
    }
    if config.num_workers == 0 {
        return Err(Error::NoWorkers);
    }

    let mut instances = Vec::with_capacity(config.num_workers);
    let mut handles = Vec::with_capacity(config.num_workers);
    let mut rx_ids = Vec::with_capacity(config.num_workers);

    for _ in 0..config.num_workers {
        let rx_queue_front = front_queues.assign_rx();
        let tx_queue_back = back_queues.assign_tx();
        let (instance, mailbox) =
            GkInstance::new(config.flow_ht_size, rx_queue_front, tx_queue_back);
        rx_ids.push(rx_queue_front);
        handles.push(InstanceHandle {
            rx_queue_front,
            tx_queue_back,
            mailbox,
        });
        instances.push(instance);
    }

    let shared = GkShared {
        tunnel: tunnel_from_back(&net),
        rss: RssConf::balanced(&rx_ids),
        net,
        clock,
        front,
        back,
        lls,
        exiting,
        instances: handles,
    };
    Ok((shared, instances))
}

/// The static tunnel carried by every shard until the grantor FIB lands:
/// sourced from the back interface, remote endpoint unresolved.
fn tunnel_from_back(net: &NetConfig) -> TunnelInfo {
    let endpoints = match (net.back.ipv4, net.back.ipv6) {
        (Some(local), _) => Endpoints::V4 {
            local,
            remote: Ipv4Addr::UNSPECIFIED,
        },
        (None, Some(local)) => Endpoints::V6 {
            local,
            remote: Ipv6Addr::UNSPECIFIED,
        },
        (None, None) => Endpoints::V4 {
            local: Ipv4Addr::UNSPECIFIED,
            remote: Ipv4Addr::UNSPECIFIED,
        },
    };
    TunnelInfo {
        src_mac: net.back.mac,
        dst_mac: net.back.mac, // placeholder until the next hop resolves
        endpoints,
    }
}

/// Launch one named thread per shard. If a spawn fails partway, the
/// already-running workers are asked to exit and joined before the error
/// propagates.
pub fn spawn_gk(
    shared: Arc<GkShared>,
    instances: Vec<GkInstance>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut joins = Vec::with_capacity(instances.len());

    for (i, instance) in instances.into_iter().enumerate() {
        let spawned = std::thread::Builder::new().name(format!("gk-{i}")).spawn({
            let shared = shared.clone();
            move || instance.run(shared)
        });

        match spawned {
            Ok(join) => joins.push(join),
            Err(err) => {
                shared.exiting.store(true, std::sync::atomic::Ordering::Release);
                for join in joins {
                    let _ = join.join();
                }
                return Err(err);
            }
        }
    }
    Ok(joins)
}
