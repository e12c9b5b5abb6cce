//! Service entry point: constructs the pipeline and runs it until a
//! shutdown signal.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stormwire::config::Config;
use stormwire::http::AppState;
use stormwire::nws_api::{NwsApiClient, PullSource};
use stormwire::nwws::{NwwsSource, RawProduct};
use stormwire::product::{ParseFailureLog, Product};
use stormwire::reference::ReferenceTable;
use stormwire::store::AlertStore;
use stormwire::{hub, http};

/// How often the persistence task snapshots the active set.
const PERSIST_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };

    let table = match ReferenceTable::load(&config.reference_path) {
        Ok(table) => {
            info!(entries = table.len(), path = %config.reference_path.display(), "reference table loaded");
            Arc::new(table)
        }
        Err(e) => {
            error!(error = %e, "cannot load reference table");
            return ExitCode::from(2);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
        .block_on(run(config, table))
}

async fn run(config: Config, table: Arc<ReferenceTable>) -> ExitCode {
    let store = Arc::new(AlertStore::new(
        config.expiration_grace,
        hub::SUBSCRIBER_QUEUE_BOUND,
    ));
    let parse_failures = Arc::new(ParseFailureLog::default());
    let shutdown = CancellationToken::new();
    let fatal = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    if let Some(path) = &config.persist_path {
        match store.load_snapshot(path, Utc::now()) {
            Ok(rehydrated) => info!(rehydrated, "snapshot loaded"),
            Err(e) => warn!(error = %e, "snapshot load failed, starting empty"),
        }
    }

    // Store housekeeping.
    {
        let store = store.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { store.run_eviction(token).await });
    }
    if let Some(path) = config.persist_path.clone() {
        let store = store.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { store.run_persistence(path, PERSIST_INTERVAL, token).await });
    }

    // Push source: XMPP transport task plus the parse-and-insert loop.
    let push_health = match config.nwws.clone() {
        Some(nwws_config) => {
            let (source, health) = NwwsSource::new(nwws_config);
            let (products_tx, products_rx) = mpsc::channel::<RawProduct>(1024);

            {
                let store = store.clone();
                let table = table.clone();
                let failures = parse_failures.clone();
                let filter = config.filter_states.clone();
                let token = shutdown.clone();
                tasks.spawn(async move {
                    run_push_ingest(products_rx, store, table, failures, filter, token).await
                });
            }
            {
                let token = shutdown.clone();
                let fatal = fatal.clone();
                tasks.spawn(async move {
                    if let Err(e) = source.run(products_tx, token.clone()).await {
                        error!(error = %e, "push source failed fatally");
                        fatal.store(true, Ordering::Relaxed);
                        token.cancel();
                    }
                });
            }
            Some(health)
        }
        None => {
            info!("push source disabled");
            None
        }
    };

    // Pull source.
    let client = match NwsApiClient::new(&config.pull.base_url, &config.pull.user_agent) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "pull source configuration error");
            return ExitCode::from(2);
        }
    };
    let (pull, pull_health) = PullSource::new(client, config.pull.poll_interval);
    {
        let store = store.clone();
        let table = table.clone();
        let filter = config.filter_states.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { pull.run(store, table, filter, token).await });
    }

    // Chaser position reports pass through to a side channel; nothing in
    // the core consumes them, so drain and log.
    let (chaser_tx, mut chaser_rx) = mpsc::channel::<serde_json::Value>(64);
    {
        let token = shutdown.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    position = chaser_rx.recv() => match position {
                        Some(position) => debug!(?position, "chaser position update"),
                        None => return,
                    }
                }
            }
        });
    }

    // HTTP + WebSocket listener.
    let state = AppState {
        store: store.clone(),
        parse_failures,
        push_health,
        pull_health,
        chaser: chaser_tx,
        shutdown: shutdown.clone(),
    };
    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %config.listen, error = %e, "cannot bind listener");
            return ExitCode::from(1);
        }
    };
    info!(address = %config.listen, "listening");

    // A signal or a fatal source error cascades through the token.
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    let server = axum::serve(listener, http::router(state));
    let graceful = {
        let token = shutdown.clone();
        server.with_graceful_shutdown(async move { token.cancelled().await })
    };
    if let Err(e) = graceful.await {
        error!(error = %e, "server error");
        shutdown.cancel();
        while tasks.join_next().await.is_some() {}
        return ExitCode::from(1);
    }

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    info!("shutdown complete");

    if fatal.load(Ordering::Relaxed) {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Parse each raw push product and feed the survivors to the store.
async fn run_push_ingest(
    mut products: mpsc::Receiver<RawProduct>,
    store: Arc<AlertStore>,
    table: Arc<ReferenceTable>,
    failures: Arc<ParseFailureLog>,
    filter_states: Vec<String>,
    shutdown: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            _ = shutdown.cancelled() => return,
            raw = products.recv() => match raw {
                Some(raw) => raw,
                None => return,
            },
        };

        if !Product::looks_like_alert(&raw.body) {
            continue;
        }

        match Product::parse_with(&raw.body, raw.received_at, Some(&table)) {
            Ok(product) => {
                for alert in product.alerts {
                    if !alert.touches_states(&filter_states) {
                        debug!(product_id = %alert.product_id, "dropped by state filter");
                        continue;
                    }
                    let outcome = store.upsert(alert);
                    debug!(?outcome, "push product applied");
                }
            }
            Err(e) => {
                warn!(error = %e, "push product failed to parse");
                failures.record(&raw.body, &e, raw.received_at);
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
