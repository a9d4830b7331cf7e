use callsig::calls::{CallRegistry, Collaborators, Coordinator, LoggingPushNotifier};
use callsig::config::CoordinatorConfig;
use callsig::socket::consts::DEFAULT_BIND_ADDR;
use callsig::socket::{ConnectionHub, SignalingServer};
use callsig::store::{MemoryCallRecordStore, MemoryPendingCallStore, MemoryProfileDirectory};
use chrono::Local;
use clap::Parser;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const PENDING_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// WebSocket call signaling server.
#[derive(Parser, Debug)]
#[command(name = "callsig-server", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// Seconds a call may ring before it is marked missed.
    #[arg(long, default_value_t = sigcore::RING_TIMEOUT_SECS)]
    ring_timeout_secs: u64,

    /// Seconds an offer for an offline callee is kept.
    #[arg(long, default_value_t = 120)]
    pending_ttl_secs: u64,

    /// Do not send push alerts to offline callees.
    #[arg(long)]
    no_push: bool,
}

impl Args {
    fn coordinator_config(&self) -> CoordinatorConfig {
        let config = CoordinatorConfig::default()
            .with_ring_timeout(Duration::from_secs(self.ring_timeout_secs))
            .with_pending_ttl(Duration::from_secs(self.pending_ttl_secs));
        if self.no_push {
            config.without_push()
        } else {
            config
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.coordinator_config();
    info!("Starting with {config:?}");

    let pending = Arc::new(MemoryPendingCallStore::new(config.pending_ttl));
    let collaborators = Collaborators {
        records: Arc::new(MemoryCallRecordStore::new()),
        pending: pending.clone(),
        profiles: Arc::new(MemoryProfileDirectory::new()),
        push: Arc::new(LoggingPushNotifier),
    };
    let hub = Arc::new(ConnectionHub::new());
    let coordinator = Coordinator::new(config, CallRegistry::new(), hub, collaborators);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PENDING_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = pending.purge_expired();
            if purged > 0 {
                debug!("Purged {purged} expired pending offers");
            }
        }
    });

    let listener = TcpListener::bind(args.bind).await?;
    let server = SignalingServer::new(coordinator);
    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
