use std::time::Duration;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{info, warn};

use task_broker_worker::multiplier::MultiplierEngine;
use task_broker_worker::runtime::{ExitReason, WorkerRuntime};

#[derive(Parser, Debug)]
#[command(about = "Task broker worker: computes units of work streamed back to the manager")]
struct Args {
    /// Manager address to connect to
    #[arg(long, default_value = "127.0.0.1:50017")]
    manager_addr: String,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 20)]
    connect_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let stream = connect_with_retry(&args.manager_addr, args.connect_attempts).await?;
    info!(manager = %args.manager_addr, "connected to manager");

    let runtime = WorkerRuntime::new(MultiplierEngine::new());
    match runtime.run(stream).await {
        ExitReason::Terminated => info!("terminated by manager"),
        ExitReason::Disconnected => info!("manager connection closed"),
    }
    Ok(())
}

async fn connect_with_retry(addr: &str, attempts: u32) -> std::io::Result<TcpStream> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(e);
                }
                warn!(error = %e, attempt, "manager not reachable, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
