//! Wires the three accept loops and the two periodic index
//! tasks (stats polling and reorg planning) into one
//! running index server.

use crate::dispatch::IndexState;
use crate::protocol::{client_conn, control_conn, worker_conn};
use crate::reorg::ReorgController;
use stc_config::{CacheConfig, IndexServerConfig};
use stc_wire::{ControlMessage, ReorgAction};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Join handles for every task the index server spawned, so a caller can
/// await or abort the whole thing as one unit.
pub struct ServerHandles {
    pub client: JoinHandle<()>,
    pub worker: JoinHandle<()>,
    pub control: JoinHandle<()>,
    pub stats_poller: JoinHandle<()>,
    pub reorg_planner: JoinHandle<()>,
}

impl ServerHandles {
    pub async fn join(self) {
        let _ = tokio::join!(self.client, self.worker, self.control, self.stats_poller, self.reorg_planner);
    }

    pub fn abort_all(&self) {
        self.client.abort();
        self.worker.abort();
        self.control.abort();
        self.stats_poller.abort();
        self.reorg_planner.abort();
    }
}

/// Bind the client, worker, and control listeners and start the
/// background stats/reorg tasks. Returns once every listener is bound;
/// the returned handles keep running until aborted or the process exits.
pub async fn run(cache: CacheConfig, config: IndexServerConfig) -> std::io::Result<ServerHandles> {
    let state = Arc::new(IndexState::new(cache));

    let client_listener = TcpListener::bind((config.host.as_str(), config.client_port)).await?;
    let worker_listener = TcpListener::bind((config.host.as_str(), config.worker_port)).await?;
    let control_listener = TcpListener::bind((config.host.as_str(), config.control_port)).await?;
    info!(
        client_port = config.client_port,
        worker_port = config.worker_port,
        control_port = config.control_port,
        "index server listening"
    );

    let client = {
        let state = state.clone();
        tokio::spawn(accept_loop(client_listener, state, client_conn::run, "client"))
    };
    let worker = {
        let state = state.clone();
        tokio::spawn(accept_loop(worker_listener, state, worker_conn::run, "worker"))
    };
    let control = {
        let state = state.clone();
        tokio::spawn(accept_loop(control_listener, state, control_conn::run, "control"))
    };

    let stats_poller = {
        let state = state.clone();
        let interval = Duration::from_secs(config.stats_poll_seconds.max(1));
        tokio::spawn(stats_poll_loop(state, interval))
    };

    let reorg_planner = {
        let state = state.clone();
        let interval = Duration::from_secs(config.reorg_interval_seconds.max(1));
        let controller = ReorgController::new(config.reorg_colocation_weight, config.reorg_half_life_seconds());
        tokio::spawn(reorg_loop(state, controller, interval))
    };

    Ok(ServerHandles { client, worker, control, stats_poller, reorg_planner })
}

async fn accept_loop<F, Fut>(listener: TcpListener, state: Arc<IndexState>, handler: F, kind: &'static str)
where
    F: Fn(tokio::net::TcpStream, Arc<IndexState>) -> Fut + Send + Sync + 'static + Copy,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!(%peer, kind, "accepted connection");
                let state = state.clone();
                tokio::spawn(async move { handler(socket, state).await });
            }
            Err(e) => {
                warn!(error = %e, kind, "accept failed");
            }
        }
    }
}

/// Ask every node's control connection for fresh stats every tick; each
/// node answers asynchronously on its own connection task with
/// `ControlMessage::Stats`.
async fn stats_poll_loop(state: Arc<IndexState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for node_id in state.nodes.all_node_ids() {
            if let Some(tx) = state.nodes.control_sender(node_id) {
                let _ = tx.send(ControlMessage::GetStats);
            }
        }
    }
}

/// Plan a reorg pass every tick and feed each action to the right node's
/// control connection: moves go to the destination (it drives the
/// fetch), removes go to the owning node.
async fn reorg_loop(state: Arc<IndexState>, controller: ReorgController, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let plan = controller.plan(&state.directories, &state.nodes, &state.cache);
        if plan.is_empty() {
            continue;
        }
        info!(actions = plan.len(), "reorg plan produced");
        for description in plan {
            let target = match description.action {
                ReorgAction::Move { to_node } => to_node,
                ReorgAction::Remove => description.from_node,
            };
            if let Some(tx) = state.nodes.control_sender(target) {
                let _ = tx.send(ControlMessage::Reorg { description });
            }
        }
    }
}
