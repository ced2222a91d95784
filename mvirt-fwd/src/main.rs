use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use mvirt_fwd::assign::{Topology, assign};
use mvirt_fwd::config::ForwarderConfig;
use mvirt_fwd::cpu;
use mvirt_fwd::dataplane::{
    BufferPool, ForwardingWorker, PortQueues, TapPorts, WorkerHandle, spawn_worker,
};
use mvirt_fwd::error::{FwdError, Result};
use mvirt_fwd::filter::BlockList;
use mvirt_fwd::reporter::{StatsReporter, spawn_reporter};
use mvirt_fwd::stats::StatsRegistry;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mvirt-fwd")]
#[command(about = "Two-port packet forwarder with source-address filtering")]
struct Args {
    /// Number of RX/TX queues per port
    #[arg(short, long)]
    queues: Option<u16>,

    /// Seconds between statistics reports
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Destination MAC written into forwarded frames
    #[arg(long)]
    dst_mac: Option<String>,

    /// Blocked IPv4 source address (repeatable, replaces the configured list)
    #[arg(long = "block")]
    blocked: Vec<String>,

    /// Forward in both directions
    #[arg(long)]
    bidirectional: bool,

    /// Number of packet buffers
    #[arg(long)]
    pool_size: Option<usize>,

    /// JSON config file, flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port devices (exactly two)
    #[arg(last = true)]
    ports: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<(ForwarderConfig, Vec<String>)> {
        let mut config = match &self.config {
            Some(path) => ForwarderConfig::from_file(path)?,
            None => ForwarderConfig::default(),
        };

        if let Some(queues) = self.queues {
            config.queues = queues;
        }
        if let Some(secs) = self.stats_interval {
            config.stats_interval_secs = secs;
        }
        if let Some(mac) = self.dst_mac {
            config.dst_mac = mac;
        }
        if !self.blocked.is_empty() {
            config.blocked = self.blocked;
        }
        if self.bidirectional {
            config.bidirectional = true;
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }

        config.validate()?;
        Ok((config, self.ports))
    }
}

fn build_blocklist(entries: &[String]) -> BlockList {
    let mut list = BlockList::new();
    for entry in entries {
        // Fail open: a bad entry is skipped, not fatal
        if let Err(e) = list.add(entry) {
            warn!(address = %entry, error = %e, "Blocked address not enforced");
        }
    }
    list
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mvirt_fwd=info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!(error = %e, "Forwarder failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let (config, port_names) = args.into_config()?;
    if port_names.len() != 2 {
        return Err(FwdError::PortCount(port_names.len()));
    }

    let cpus = cpu::available_cpus()?;
    let topology = Topology::two_port();
    let assignments = assign(&cpus, config.queues, &config.egress_ports(), &topology)?;
    info!(
        workers = assignments.len(),
        "Using {} RX/TX queues",
        config.queues
    );

    let pool = BufferPool::new(config.pool_size)?;
    let ports = TapPorts::open(&port_names, config.queues as usize, Arc::clone(&pool))
        .map_err(|(name, source)| FwdError::Port { name, source })?;
    info!(ports = ?ports.names().collect::<Vec<_>>(), "Ports ready");
    let ports: Arc<dyn PortQueues> = Arc::new(ports);

    let blocklist = Arc::new(build_blocklist(&config.blocked));
    info!(
        blocked = ?blocklist.iter().collect::<Vec<_>>(),
        dst_mac = %config.dst_mac,
        "Filter configured"
    );

    let stats = Arc::new(StatsRegistry::new(ports.port_count()));
    let dst_mac = config.dst_mac()?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut workers: Vec<WorkerHandle> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let worker = ForwardingWorker::new(
            assignment,
            Arc::clone(&ports),
            Arc::clone(&blocklist),
            Arc::clone(&stats),
            dst_mac,
        )
        .with_burst_size(config.burst_size);

        // Dropping `workers` on error stops the ones already running
        workers.push(spawn_worker(worker, Arc::clone(&shutdown)).map_err(FwdError::Spawn)?);
    }

    let (stop_reporter, reporter_rx) = crossbeam_channel::bounded::<()>(0);
    let reporter = StatsReporter::new(Arc::clone(&stats), config.stats_interval());
    let reporter = spawn_reporter(reporter, reporter_rx, cpus.first().copied())
        .map_err(FwdError::Spawn)?;

    let mut sigint = signal(SignalKind::interrupt()).map_err(FwdError::Signal)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(FwdError::Signal)?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    for worker in &workers {
        worker.stop();
    }
    for worker in workers {
        let assignment = worker.assignment;
        if let Err(e) = worker.join() {
            error!(%assignment, error = %e, "Worker did not stop cleanly");
        }
    }

    drop(stop_reporter);
    if reporter.join().is_err() {
        error!("Stats reporter panicked");
    }

    for (port, totals) in stats.snapshot_all().iter().enumerate() {
        info!(
            port,
            rx_packets = totals.rx_packets,
            rx_bytes = totals.rx_bytes,
            tx_packets = totals.tx_packets,
            tx_bytes = totals.tx_bytes,
            dropped = totals.dropped,
            "Final port statistics"
        );
    }

    info!(pool = ?pool.stats(), "Forwarder stopped");
    Ok(())
}
