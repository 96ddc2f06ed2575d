use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ingest_gateway::api::{self, AppState};
use ingest_gateway::broker::KafkaConnector;
use ingest_gateway::health::ErrorTracker;
use ingest_gateway::metrics::IngestMetrics;
use ingest_gateway::schema::SchemaDocument;
use ingest_gateway::{Config, Gateway};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "ingest-gateway")]
#[command(about = "HTTP to Kafka ingestion gateway", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting ingest-gateway");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e).context("loading configuration");
        }
    };
    if let Err(msg) = config.validate() {
        error!("Invalid configuration: {}", msg);
        anyhow::bail!("invalid configuration: {}", msg);
    }

    info!(
        broker_url = %config.broker.url,
        topic = %config.broker.topic,
        publishers = config.pipeline.publishers,
        workers_per_publisher = config.pipeline.workers_per_publisher,
        intake_capacity = config.pipeline.intake_capacity,
        retry_capacity = config.pipeline.retry_capacity,
        retry_workers = config.pipeline.retry_workers,
        max_retries = config.pipeline.max_retries,
        "Configuration summary"
    );

    let schema = SchemaDocument::load(&config.broker.schema_path)
        .context("reading serialization schema")?;

    let metrics = Arc::new(IngestMetrics::new()?);
    let tracker = Arc::new(ErrorTracker::new());

    let gateway = Gateway::start(
        &config,
        schema.name.clone(),
        &KafkaConnector,
        metrics.clone(),
        tracker.clone(),
    )
    .await
    .context("connecting to broker")?;

    let state = AppState {
        dispatcher: gateway.dispatcher(),
        health: Arc::new(gateway.health_checker(config.server.app_name.clone())),
        metrics: metrics.clone(),
        tracker: tracker.clone(),
    };

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("binding metrics port {}", metrics_addr))?;
    info!("Metrics listening on {}", metrics_addr);
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, api::build_metrics_router(metrics)).await {
            error!("Metrics server failed: {}", e);
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding port {}", addr))?;
    info!("Server listening on {}", addr);

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, api::build_router(state))
            .with_graceful_shutdown(async {
                let _ = stopped_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutdown signal received, no longer accepting requests");
    let _ = stopped_tx.send(());

    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!("HTTP server failed: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => error!("In-flight requests did not finish within {:?}", grace),
    }

    gateway.shutdown(grace).await;
    metrics_server.abort();

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("ingest_gateway=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ingest_gateway=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
