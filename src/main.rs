use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use bonusledger::accrual::{AccrualClient, AccrualService};
use bonusledger::auth::Authenticator;
use bonusledger::cache::MemCache;
use bonusledger::config::Options;
use bonusledger::gateway::{self, state::AppState};
use bonusledger::logging;
use bonusledger::store::{Keeper, PgStore};
use bonusledger::workerpool::WorkerPool;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let mut options = Options::parse();
    options.apply_env_overrides();
    options.validate()?;

    let _log_guard = logging::init(&options.log_level);
    info!(addr = %options.run_address, "starting bonusledger");

    let keeper: Option<Arc<dyn Keeper>> = if options.database_uri.is_empty() {
        tracing::warn!("database dsn is empty, running without durable storage");
        None
    } else {
        Some(Arc::new(PgStore::connect(&options.database_uri).await?))
    };

    let cache = Arc::new(MemCache::new(keeper.clone()).await);

    let pool = Arc::new(WorkerPool::new(options.concurrency));
    pool.run_background();

    let external = Arc::new(AccrualClient::new(&options.accrual_address)?);
    let accrual = Arc::new(AccrualService::new(
        Arc::clone(&cache),
        Arc::clone(&pool),
        external,
        Duration::from_millis(options.poll_interval_ms),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = {
        let accrual = Arc::clone(&accrual);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { accrual.run(shutdown).await })
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let state = Arc::new(AppState::new(
        Arc::clone(&cache),
        Arc::new(Authenticator::new(options.jwt_signing_key.clone())),
    ));

    let listener = TcpListener::bind(options.listen_addr()).await?;
    info!("listening on {}", listener.local_addr()?);

    let mut server = tokio::spawn(gateway::run_server(listener, state, shutdown_rx.clone()));
    let mut shutdown_seen = shutdown_rx.clone();

    tokio::select! {
        // the server ended on its own (bind/accept error or fully drained)
        joined = &mut server => joined??,
        _ = async {
            while !*shutdown_seen.borrow() {
                if shutdown_seen.changed().await.is_err() {
                    break;
                }
            }
        } => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(joined) => joined??,
                Err(_) => {
                    tracing::warn!("server did not drain within {SHUTDOWN_GRACE:?}, aborting");
                    server.abort();
                }
            }
        }
    }

    // Ordered teardown: dispatcher first, then drain the pool, then the DB.
    let _ = dispatcher.await;
    pool.stop().await;
    if let Some(keeper) = keeper {
        keeper.close().await;
    }

    info!("server exited properly");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
