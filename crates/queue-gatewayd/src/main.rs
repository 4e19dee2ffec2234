use anyhow::Context;
use clap::Parser;

/// queue-gatewayd runs the embedded KV-backed job queue and its HTTP
/// gateway in a single process, per `SPEC_FULL.md` §1's CLI-entrypoint
/// expansion. Modeled on `crates/agent/src/main.rs`'s
/// clap-derive-Args + tracing-subscriber + multi-thread-runtime shape.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Port the HTTP gateway listens on.
    #[clap(long, default_value = "8080", env = "GATEWAY_PORT")]
    gateway_port: u16,
    /// Directory backing the embedded key-value store.
    #[clap(long, env = "DATA_DIR")]
    data_dir: std::path::PathBuf,
    /// Default lease duration attached to newly scheduled keys.
    #[clap(long, default_value = "30m", env = "ENQUEUE_TTL")]
    enqueue_ttl: humantime::Duration,
    /// Interval at which the request cache sweeps stale entries.
    #[clap(long, default_value = "5m", env = "REAPER_PERIOD")]
    reaper_period: humantime::Duration,
}

fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args));
    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.gateway_port))
        .await
        .context("failed to bind gateway port")?;

    let store = queue_store::Store::open(&args.data_dir)
        .await
        .context("failed to open embedded key-value store")?;
    let engine = queue_engine::Engine::new(store);

    let config = queue_gateway::GatewayConfig {
        enqueue_ttl: *args.enqueue_ttl,
        reaper_period: *args.reaper_period,
    };
    let app = queue_gateway::App::new(engine, config);

    let router = queue_gateway::router(app.clone());

    tracing::info!(port = args.gateway_port, "queue-gatewayd: listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    app.queue.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("shutdown signal received, stopping queue-gatewayd");
}
