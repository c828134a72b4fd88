use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use database::connection::connect;
use database::listen::ChangeStream;
use database::repository::DbRepository;
use fossil_client::FossilClient;
use tokio_util::sync::CancellationToken;
use ws_server::dispatcher::Dispatcher;
use ws_server::jobs::JobTracker;
use ws_server::registry::SubscriptionRegistry;
use ws_server::AppState;

/// A websocket fanout server for Pitch Lake vault, gas and pricing data.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Override the listen address from configuration (e.g. "127.0.0.1:9000").
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from a .env file if one is present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = configuration::load_config()?;

    let addr = match cli.addr {
        Some(addr) => addr,
        None => format!("{}:{}", config.server.host, config.server.port).parse()?,
    };

    // The database is owned by the indexer; this service only reads from it
    // and listens for its change notifications.
    let db_pool = connect(&config.database.url).await?;
    let db_repo = DbRepository::new(db_pool);

    let registry = Arc::new(SubscriptionRegistry::new());
    let shutdown = CancellationToken::new();

    let oracle = Arc::new(FossilClient::new(&config.fossil)?);
    let jobs = Arc::new(JobTracker::new(
        oracle,
        Arc::clone(&registry),
        Duration::from_secs(config.fossil.poll_interval_secs),
        shutdown.clone(),
    ));

    // Fan database change notifications out to the subscribed sessions.
    let stream = ChangeStream::connect(&config.database.url).await?;
    let dispatcher = Dispatcher::new(Arc::clone(&registry));
    let listener = tokio::spawn(dispatcher.run(stream, shutdown.clone()));

    let state = Arc::new(AppState {
        db_repo,
        registry,
        jobs,
        shutdown: shutdown.clone(),
        allowed_origin: config.server.app_url.clone(),
    });

    // Ctrl-C cancels the root token, which closes every session with a
    // restart frame and stops the listener and job pollers.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    let result = ws_server::run_server(addr, state).await;

    shutdown.cancel();
    listener.await?;

    result
}
