// tritond: Sidecar daemon for the non-blocking forwarder path.
//
// The shipped binary supports the debug sink (TRITOND_OUTPUT_FILE).
// Forwarding to a real backend requires embedding the receiver with a
// BackendFactory for the target cloud SDK; see the sink module.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;
use tritond::batcher::Batcher;
use tritond::config::DaemonConfig;
use tritond::receiver::Receiver;
use tritond::sink::{DebugSink, Sink};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tritond starting");

    let cfg = DaemonConfig::from_env();

    let sink: Arc<dyn Sink> = match &cfg.output_file {
        Some(path) => match DebugSink::create(path) {
            Ok(sink) => {
                info!(path = %path.display(), "writing to debug sink");
                Arc::new(sink)
            }
            Err(e) => {
                eprintln!("FATAL: cannot open output file: {e}");
                std::process::exit(1);
            }
        },
        None => {
            eprintln!(
                "FATAL: no sink configured: set {} or embed tritond with a backend factory",
                tritond::config::ENV_OUTPUT_FILE
            );
            std::process::exit(1);
        }
    };

    let receiver = match Receiver::bind(&cfg.bind_endpoint).await {
        Ok(receiver) => receiver,
        Err(e) => {
            eprintln!("FATAL: cannot bind {}: {e}", cfg.bind_endpoint);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(());
    });

    let batcher = Batcher::new(sink, cfg.flush_max_records);
    receiver.run(batcher, cfg.flush_interval, shutdown_rx).await;
    info!("tritond stopped");
}
