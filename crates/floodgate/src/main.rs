//! The floodgate daemon: configuration, worker launch, and shutdown for
//! the GK and LLS blocks. Packet I/O runs over in-memory loopback ports
//! until a real poll-mode driver is wired in; `--demo` feeds those ports
//! synthetic request traffic so the dataplane is observable end to end.

use anyhow::Context;
use clap::Parser;
use gk::{setup_gk, spawn_gk, GkConfig};
use lls::{LlsCtx, LlsQueues, LlsWorker};
use net::{
    frame_dscp, FlowKey, Iface, IfaceConfig, LoopbackPort, NetConfig, Packet, QueueAllocator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A DDoS-mitigation dataplane between an untrusted front network and a
/// protected back network.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "FLOODGATE_CONFIG")]
    config: std::path::PathBuf,

    /// Feed synthetic request traffic through the loopback ports and log
    /// what comes out of the back interface.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    demo: bool,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    front: IfaceConfig,
    back: IfaceConfig,
    #[serde(default = "default_gk_workers")]
    gk_workers: usize,
    #[serde(default = "default_flow_ht_size")]
    flow_ht_size: usize,
}

fn default_gk_workers() -> usize {
    2
}

fn default_flow_ht_size() -> usize {
    1024
}

// Signal handlers may only touch a static flag; a watcher thread folds it
// into the process-wide exiting flag the workers poll.
static SIGNALED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SIGNALED.store(true, Ordering::Release);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let raw = std::fs::read(&cli.config)
        .with_context(|| format!("failed to read config {:?}", cli.config))?;
    let config: Config = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse config {:?}", cli.config))?;

    let net = NetConfig::new(Iface::new(config.front), Iface::new(config.back));
    let clock = Arc::new(clock::Clock::system());
    let exiting = Arc::new(AtomicBool::new(false));

    // Front: one RX queue per GK worker plus one for LLS, one TX queue
    // for LLS. Back: one RX queue for LLS, one TX queue per GK worker
    // plus one for LLS.
    let front: Arc<LoopbackPort> = Arc::new(LoopbackPort::new(config.gk_workers + 1, 1));
    let back: Arc<LoopbackPort> = Arc::new(LoopbackPort::new(1, config.gk_workers + 1));

    let lls_ctx = LlsCtx {
        net: net.clone(),
        clock: clock.clone(),
        front: front.clone(),
        back: back.clone(),
        exiting: exiting.clone(),
    };
    let lls_queues = LlsQueues {
        rx_front: config.gk_workers as u16,
        tx_front: 0,
        rx_back: 0,
        tx_back: config.gk_workers as u16,
    };
    let (lls_worker, lls_handle) = LlsWorker::new(&lls_ctx, lls_queues);

    let mut front_queues = QueueAllocator::default();
    let mut back_queues = QueueAllocator::default();
    let gk_config = GkConfig {
        flow_ht_size: config.flow_ht_size,
        num_workers: config.gk_workers,
    };
    let (shared, instances) = setup_gk(
        &gk_config,
        net,
        clock,
        front.clone(),
        back.clone(),
        lls_handle,
        exiting.clone(),
        &mut front_queues,
        &mut back_queues,
    )
    .context("failed to set up the GK block")?;
    let shared = Arc::new(shared);

    install_signal_handlers();
    let watcher = {
        let exiting = exiting.clone();
        std::thread::Builder::new()
            .name("signal-watcher".to_string())
            .spawn(move || {
                while !SIGNALED.load(Ordering::Acquire) && !exiting.load(Ordering::Acquire) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                exiting.store(true, Ordering::Release);
            })
            .context("failed to spawn the signal watcher")?
    };

    let lls_join = std::thread::Builder::new()
        .name("lls".to_string())
        .spawn(move || lls_worker.run(lls_ctx))
        .context("failed to spawn the LLS worker")?;

    let gk_joins = spawn_gk(shared.clone(), instances).context("failed to spawn GK workers")?;
    tracing::info!(workers = config.gk_workers, "floodgate is running");

    let demo_join = if cli.demo {
        Some(spawn_demo(shared.clone(), front.clone(), back.clone())?)
    } else {
        None
    };

    for join in gk_joins {
        let _ = join.join();
    }
    let _ = lls_join.join();
    if let Some(join) = demo_join {
        let _ = join.join();
    }
    let _ = watcher.join();

    tracing::info!("floodgate exited cleanly");
    Ok(())
}

/// Inject request traffic for a handful of synthetic flows into the
/// owning shards' RX queues, and report the DSCP distribution of what the
/// dataplane forwards.
fn spawn_demo(
    shared: Arc<gk::GkShared>,
    front: Arc<LoopbackPort>,
    back: Arc<LoopbackPort>,
) -> anyhow::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("demo".to_string())
        .spawn(move || {
            let flows: Vec<FlowKey> = (1..=4u8)
                .map(|n| FlowKey::V4 {
                    src: [10, 0, 0, n].into(),
                    dst: [172, 16, 5, 5].into(),
                    proto: 17,
                })
                .collect();

            while !shared.exiting.load(Ordering::Acquire) {
                for flow in &flows {
                    let FlowKey::V4 { src, dst, .. } = flow else {
                        continue;
                    };
                    let queue = shared.rss.queue_for_hash(flow.rss_hash());
                    front.inject(queue, demo_frame(src.octets(), dst.octets()));
                }
                std::thread::sleep(std::time::Duration::from_millis(100));

                let mut forwarded = 0usize;
                let mut dscps = Vec::new();
                for instance in &shared.instances {
                    for packet in back.drain_tx(instance.tx_queue_back) {
                        forwarded += 1;
                        if let Some(dscp) = frame_dscp(packet.as_slice()) {
                            dscps.push(dscp);
                        }
                    }
                }
                if forwarded > 0 {
                    tracing::info!(forwarded, ?dscps, "demo traffic forwarded");
                }
            }
        })
        .map_err(Into::into)
}

fn demo_frame(src: [u8; 4], dst: [u8; 4]) -> Packet {
    let mut frame = vec![0u8; 64];
    frame[12..14].copy_from_slice(&net::wire::ETHERTYPE_IPV4.to_be_bytes());
    frame[14] = 0x45;
    frame[23] = 17;
    frame[26..30].copy_from_slice(&src);
    frame[30..34].copy_from_slice(&dst);
    Packet::from_slice(&frame)
}
