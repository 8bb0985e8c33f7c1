use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use task_broker_manager::connection;
use task_broker_manager::coordinator::Coordinator;
use task_broker_manager::front_end;
use task_broker_manager::registry::WorkerRegistry;

#[derive(Parser, Debug)]
#[command(about = "Task broker manager: broadcasts work to connected workers and collects results")]
struct Args {
    /// Address workers connect to
    #[arg(long, default_value = "127.0.0.1:50017")]
    worker_addr: String,

    /// Address dispatch clients connect to
    #[arg(long, default_value = "127.0.0.1:50018")]
    dispatch_addr: String,

    /// Fail a dispatch that has not completed after this many seconds
    #[arg(long)]
    dispatch_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let registry = WorkerRegistry::new();
    let timeout = args.dispatch_timeout_secs.map(Duration::from_secs);
    let coordinator = Arc::new(Coordinator::new(registry.clone(), timeout));

    let worker_listener = TcpListener::bind(&args.worker_addr).await?;
    let dispatch_listener = TcpListener::bind(&args.dispatch_addr).await?;
    info!(
        worker_addr = %args.worker_addr,
        dispatch_addr = %args.dispatch_addr,
        "manager listening"
    );

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("shutdown requested");
        ctrl_c_token.cancel();
    });

    let workers = tokio::spawn(connection::serve_workers(
        worker_listener,
        registry.clone(),
        shutdown.clone(),
    ));
    let dispatch = tokio::spawn(front_end::serve_dispatch(
        dispatch_listener,
        coordinator.clone(),
        shutdown.clone(),
    ));

    shutdown.cancelled().await;

    let _ = workers.await;
    let _ = dispatch.await;

    // Tell the pool to terminate and give the connections a moment to
    // flush the DIE frames before the process exits.
    coordinator.terminate_workers().await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    info!("manager stopped");
    Ok(())
}
