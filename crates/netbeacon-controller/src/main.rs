//! NetBeacon Controller Server
//!
//! gRPC control plane for fleet network telemetry: agent bootstrap,
//! telemetry ingestion, real-time watch fan-out, and the speed-test
//! job queue.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use netbeacon_proto::v1::agent_service_server::AgentServiceServer;
use netbeacon_proto::v1::bootstrap_service_server::BootstrapServiceServer;
use netbeacon_proto::v1::watch_service_server::WatchServiceServer;

use netbeacon_controller::auth::{ChallengeStore, PskAuthenticator, SignedRequestVerifier};
use netbeacon_controller::dispatch::{DispatchContext, Dispatcher, HandlerRegistry};
use netbeacon_controller::hub::agent::AgentHub;
use netbeacon_controller::hub::subscription::SubscriptionHub;
use netbeacon_controller::queue::SpeedTestQueue;
use netbeacon_controller::server::{AgentServiceImpl, BootstrapServiceImpl, WatchServiceImpl};
use netbeacon_controller::storage::{retention, ControllerDatabase};

#[derive(Parser, Debug)]
#[command(name = "netbeacon-controller")]
#[command(
    version,
    about = "NetBeacon controller - fleet telemetry control plane"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:4580")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long, env = "NETBEACON_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Telemetry retention horizon in days.
    #[arg(long, default_value_t = 90)]
    retention_days: i64,

    /// Age in seconds after which pending speed-test jobs expire.
    #[arg(long, default_value_t = 3600)]
    queue_expiry_secs: i64,

    /// Interval in seconds between speed-test queue sweeps.
    #[arg(long, default_value_t = 60)]
    queue_sweep_secs: u64,

    /// Allowed clock skew for signed requests, in seconds.
    #[arg(long, default_value_t = 90)]
    auth_skew_secs: i64,

    /// Bootstrap challenge lifetime in seconds.
    #[arg(long, default_value_t = 90)]
    challenge_ttl_secs: i64,

    /// Grace period in seconds before a superseded agent stream is closed.
    #[arg(long, default_value_t = 5)]
    agent_grace_secs: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    netbeacon_core::tracing_init::init_tracing("netbeacon_controller=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting netbeacon-controller"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening controller database");
            ControllerDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening controller database (default path)");
            ControllerDatabase::open(&default_path).await?
        }
    };

    let viewers = Arc::new(SubscriptionHub::new("viewer"));
    let shares = Arc::new(SubscriptionHub::new("share"));
    let agents = Arc::new(AgentHub::new(Duration::from_secs(args.agent_grace_secs)));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(HandlerRegistry::with_default_handlers()),
        DispatchContext {
            db: db.clone(),
            viewers: Arc::clone(&viewers),
            shares: Arc::clone(&shares),
        },
    ));
    let queue = Arc::new(SpeedTestQueue::new(
        db.clone(),
        Arc::clone(&agents),
        args.queue_expiry_secs,
    ));

    let psk_auth = PskAuthenticator::new(db.clone());
    let verifier = SignedRequestVerifier::new(db.clone(), args.auth_skew_secs);
    let challenges = Arc::new(ChallengeStore::new(db.clone(), args.challenge_ttl_secs));

    // Build services
    let bootstrap =
        BootstrapServiceImpl::new(psk_auth.clone(), challenges, args.challenge_ttl_secs);
    let agent_svc = AgentServiceImpl::new(
        db.clone(),
        psk_auth,
        verifier,
        Arc::clone(&dispatcher),
        Arc::clone(&queue),
        Arc::clone(&agents),
    );
    let watch = WatchServiceImpl::new(db.clone(), Arc::clone(&viewers), Arc::clone(&shares));

    // Background sweeps
    retention::spawn_sweeper(db.clone(), args.retention_days);
    Arc::clone(&queue).spawn_sweeper(Duration::from_secs(args.queue_sweep_secs));

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<BootstrapServiceServer<BootstrapServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<AgentServiceServer<AgentServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<WatchServiceServer<WatchServiceImpl>>()
        .await;

    let grpc_router = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)))
        .add_service(health_service)
        .add_service(BootstrapServiceServer::new(bootstrap))
        .add_service(AgentServiceServer::new(agent_svc))
        .add_service(WatchServiceServer::new(watch));

    info!(addr = %args.addr, "Controller server starting");

    tokio::select! {
        result = grpc_router.serve(args.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Controller stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".netbeacon").join("controller.db"))
}
