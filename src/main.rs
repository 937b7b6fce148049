mod backfill;
mod config;
mod domain;
mod errors;
mod fanout;
mod livetail;
mod metrics;
mod parser;
mod reorg;
mod rpc;
mod store;
mod telemetry;

use crate::config::{get_global_config, init_global_config};
use crate::rpc::{AlloyNode, RetryPolicy};
use crate::store::postgres::PostgresStore;
use crate::telemetry::TelemetryConfig;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

async fn run_fanout_server(hub: fanout::Hub, port: u16, cancel_token: CancellationToken) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(fanout::ws_handler))
        .layer(cors)
        .with_state(hub);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind fanout server");
            return;
        }
    };

    info!(%addr, "fanout server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
        .ok();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_global_config()?;
    let settings = get_global_config();

    telemetry::init_tracing(TelemetryConfig {
        log_level: settings.log_level.clone(),
        log_format: settings.log_format.clone(),
        log_file: None,
        rotation: "daily".to_string(),
    })?;

    metrics::init_metrics()?;

    let cancel_token = CancellationToken::new();

    let retry_policy = RetryPolicy {
        max_retries: settings.rpc_max_retries,
        base_backoff: settings.rpc_retry_backoff(),
        per_request_timeout: settings.rpc_timeout(),
    };
    let node = AlloyNode::new(
        &settings.rpc_url,
        settings.rpc_connect_timeout(),
        retry_policy,
        cancel_token.clone(),
    )?;

    let store = PostgresStore::connect(
        &settings.database_url(),
        settings.db_max_conns,
        settings.db_conn_timeout(),
        settings.db_idle_timeout(),
        settings.db_conn_lifetime(),
    )
    .await?;
    store.run_migrations().await?;

    let hub = fanout::Hub::new();

    let fanout_cancel = cancel_token.clone();
    let fanout_hub = hub.clone();
    let fanout_port = settings.fanout_port;
    tokio::spawn(async move {
        run_fanout_server(fanout_hub, fanout_port, fanout_cancel).await;
    });

    if let (Some(start), Some(end)) = (settings.backfill_start_height, settings.backfill_end_height) {
        info!(start, end, "starting backfill");
        let config = backfill::BackfillConfig {
            start,
            end,
            workers: settings.backfill_workers,
            batch_size: settings.backfill_batch_size,
        };
        backfill::run_backfill(node.clone(), store.clone(), config, cancel_token.clone()).await?;
    }

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    let livetail_config = livetail::LiveTailConfig {
        poll_interval: settings.livetail_poll_interval(),
        genesis_height: settings.backfill_start_height.unwrap_or(0),
        reorg_max_depth: settings.reorg_max_depth,
    };

    livetail::run_live_tail(node, store, hub, livetail_config, cancel_token).await?;

    Ok(())
}

