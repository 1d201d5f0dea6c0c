//! Echo server daemon built on the rutile reactor.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use rutile::Server;
use rutile_echo::EchoHandler;

#[derive(Parser)]
#[command(name = "rutile-echo")]
#[command(version, about = "TCP echo server on a multiplexed reactor", long_about = None)]
struct Cli {
    /// Host to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to.
    #[arg(short, long, default_value_t = 6666)]
    port: u16,

    /// Number of poller threads (default: hardware parallelism + 1).
    #[arg(long)]
    pollers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut server = Server::build(EchoHandler::default())
        .host(cli.host)
        .port(cli.port);
    if let Some(pollers) = cli.pollers {
        server = server.pool_size(pollers);
    }
    server.start()?;

    wait_for_shutdown_signal()?;
    info!("shutdown signal received");
    server.shutdown();
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown_signal() -> Result<()> {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

#[cfg(windows)]
fn wait_for_shutdown_signal() -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;
    Ok(())
}
