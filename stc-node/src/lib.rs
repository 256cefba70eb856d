//! Cache node process: runs the delivery accept loop (C6), a
//! pool of worker connections (C2/C4's client-of-the-index role), and one
//! control connection (C5), all sharing the same per-type `NodeCache`s.

pub mod cache_set;
pub mod control;
pub mod delivery_client;
pub mod delivery_server;
pub mod error;
pub mod peers;
pub mod remote_fetch;
pub mod worker;

pub use error::{NodeError, Result};

use cache_set::NodeCacheSet;
use peers::PeerBook;
use stc_delivery::DeliveryRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Runs a node process to completion (i.e. forever, barring a bind
/// failure on startup). The delivery listener binds once; the control
/// connection and its worker pool are rebuilt every time the control link
/// to the index drops and reconnects.
pub async fn run(config: stc_config::Config) -> Result<()> {
    let caches = Arc::new(NodeCacheSet::from_config(&config.cache));
    let registry = Arc::new(DeliveryRegistry::new(config.nodeserver.delivery_ttl_seconds as i64 * 1_000_000));
    let peers = PeerBook::new();

    let listener = TcpListener::bind((config.nodeserver.host.as_str(), config.nodeserver.delivery_port)).await?;
    info!(host = %config.nodeserver.host, port = config.nodeserver.delivery_port, "delivery listener bound");
    tokio::spawn(delivery_server::run(listener, caches.clone(), registry.clone()));
    tokio::spawn(expire_deliveries_loop(registry.clone()));

    let control_ctx = Arc::new(control::ControlContext {
        caches: caches.clone(),
        peers: peers.clone(),
        self_host: config.nodeserver.host.clone(),
        self_delivery_port: config.nodeserver.delivery_port,
    });

    let reconnect = Duration::from_secs(config.nodeserver.control_reconnect_seconds.max(1));

    loop {
        let (registered_tx, registered_rx) = oneshot::channel();
        let session = control::run_session(
            &config.nodeserver.index_host,
            config.nodeserver.index_control_port,
            &control_ctx,
            registered_tx,
        );
        tokio::pin!(session);

        let node_id = tokio::select! {
            biased;
            node_id = registered_rx => match node_id {
                Ok(id) => id,
                Err(_) => {
                    // The control session errored before completing its
                    // handshake; `session` has already resolved too.
                    if let Err(e) = session.await {
                        warn!(error = %e, "control connection failed before registering");
                    }
                    tokio::time::sleep(reconnect).await;
                    continue;
                }
            },
        };

        let worker_ctx = Arc::new(worker::WorkerContext {
            self_node_id: node_id,
            self_host: config.nodeserver.host.clone(),
            delivery_port: config.nodeserver.delivery_port,
            caches: caches.clone(),
            registry: registry.clone(),
            peers: peers.clone(),
        });
        let worker_reconnect = Duration::from_secs(config.nodeserver.worker_reconnect_seconds.max(1));

        let mut worker_handles = Vec::with_capacity(config.nodeserver.threads);
        for _ in 0..config.nodeserver.threads.max(1) {
            let index_host = config.nodeserver.index_host.clone();
            let index_worker_port = config.nodeserver.index_worker_port;
            let ctx = worker_ctx.clone();
            worker_handles.push(tokio::spawn(worker::run_forever(index_host, index_worker_port, worker_reconnect, ctx)));
        }

        if let Err(e) = session.await {
            warn!(error = %e, "control connection to index lost");
        }
        for h in worker_handles {
            h.abort();
        }
        tokio::time::sleep(reconnect).await;
    }
}

/// Sweeps TTL-expired deliveries that were never fully pulled. `pull` already rejects an expired
/// ticket on access, so this loop only matters for tickets nobody ever
/// asked for.
async fn expire_deliveries_loop(registry: Arc<DeliveryRegistry>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        ticker.tick().await;
        let swept = registry.expire_stale();
        if swept > 0 {
            tracing::debug!(swept, "expired stale deliveries");
        }
    }
}
