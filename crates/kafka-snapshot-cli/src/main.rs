//! Kafka topic snapshot CLI
//!
//! Dumps a point-in-time snapshot of one Kafka topic to stdout or a file:
//! partition end offsets are frozen once at startup, and the dump ends when
//! every partition reaches its frozen offset, regardless of concurrent
//! producers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_snapshot_core::client::kafka::KafkaConnector;
use kafka_snapshot_core::consumer::BoundedConsumer;
use kafka_snapshot_core::metrics::ConsumerMetrics;
use kafka_snapshot_core::Config;

/// Bounded Kafka topic snapshot dumper.
#[derive(Parser)]
#[command(name = "kafka-snapshot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topic to snapshot.
    topic: String,

    /// Path to configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Write the snapshot to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Serve Prometheus metrics on this address while the snapshot runs.
    #[arg(long)]
    metrics_address: Option<String>,

    /// Output logs in JSON format (for production).
    #[arg(long)]
    json_logs: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)?;

    if !config.topics.contains(&args.topic) {
        anyhow::bail!(
            "topic '{}' is not covered by the configuration (configured topics: {})",
            args.topic,
            config.topics.join(", ")
        );
    }

    setup_tracing(args.verbose, args.json_logs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        topic = %args.topic,
        servers = ?config.bootstrap_servers,
        group = %config.group_id,
        decoder = config.decoder.name(),
        "starting topic snapshot"
    );

    // Run the async runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_snapshot(args, config).await })
}

fn setup_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_snapshot(args: Args, config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(ConsumerMetrics::new());

    // Start metrics server if enabled
    if let Some(address) = args.metrics_address.clone() {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(&address, metrics).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    let consumer = BoundedConsumer::new(KafkaConnector::new(&config), config.decoder.decoder())
        .with_metrics(Arc::clone(&metrics));

    let mut stream = consumer.fetch(&args.topic).await?;

    let mut output: Box<dyn tokio::io::AsyncWrite + Unpin> = match &args.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut chunks = 0u64;
    let mut bytes = 0u64;
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!(chunks, bytes, "interrupted, releasing subscription");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    bytes += chunk.len() as u64;
                    output.write_all(&chunk).await?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    info!(chunks, bytes, "snapshot complete");
                    break;
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn serve_metrics(
    addr: &str,
    metrics: Arc<ConsumerMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
