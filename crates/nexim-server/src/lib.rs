pub mod auth;
pub mod config;
pub mod convo;
pub mod delivery;
pub mod gateway;
pub mod seq;
pub mod store;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use config::ConfigHandle;
use convo::ConversationEngine;
use delivery::bus::{self, DeliveryBus};
use delivery::membership::{MembershipCache, DEFAULT_TTL};
use delivery::{Pipeline, Pusher};
use gateway::session::CloseReason;
use gateway::table::{GatewayPusher, SessionTable};
use seq::{MemorySeqCache, SeqAllocator};
use store::Store;
use web::AppState;

pub async fn run_server() -> anyhow::Result<()> {
    let config_handle = ConfigHandle::create()?;
    let config = config_handle.load();

    info!(
        host = %config.server.listen_host,
        port = config.server.listen_port,
        db = %config.db_path.display(),
        "starting gateway"
    );

    let db_path = config.db_path.to_string_lossy().to_string();
    let store = Arc::new(Store::new(&db_path)?);

    let allocator = Arc::new(SeqAllocator::new(
        Arc::new(MemorySeqCache::new()),
        store.clone(),
    ));
    let convo = Arc::new(ConversationEngine::new(store.clone(), allocator.clone()));
    let table = Arc::new(SessionTable::new(
        config.gateway.backpressure_evict_threshold,
    ));
    table.on_close(|session| {
        info!(
            user_id = %session.user_id,
            conn_id = %session.conn_id,
            "session left the table"
        );
    });

    let pusher: Arc<dyn Pusher> = Arc::new(GatewayPusher::new(table.clone()));
    let delivery_bus = Arc::new(DeliveryBus::new());
    let membership = Arc::new(MembershipCache::new(store.clone(), DEFAULT_TTL));

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        allocator.clone(),
        convo.clone(),
        pusher.clone(),
        delivery_bus.clone(),
        membership.clone(),
        config.limits.pull_default,
        config.limits.pull_max,
    ));
    info!(node_id = %delivery_bus.node_id(), ops = ?pipeline.registered_ops(), "delivery pipeline ready");

    // Deliver cross-node notices through the local table.
    let bus_task = bus::spawn_subscriber(delivery_bus.clone(), pusher);

    // Periodic durable-floor flush for the allocator.
    let allocator_for_flush = allocator.clone();
    let flush_interval = Duration::from_secs(config.seq_flush_interval_secs.max(1));
    let flush_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        loop {
            interval.tick().await;
            allocator_for_flush.flush_floors();
        }
    });

    let state = AppState {
        config: config_handle.clone(),
        store: store.clone(),
        convo,
        table: table.clone(),
        pipeline,
        membership,
    };
    let app = web::build_router(state);

    let addr = format!("{}:{}", config.server.listen_host, config.server.listen_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_srv = shutdown_notify.clone();

    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_notify_srv.notified().await;
            })
            .await
    });

    shutdown_signal().await;

    // Close frames first, then stop accepting, then a bounded drain.
    info!("closing all sessions");
    table.close_all(CloseReason::ServerShutdown).await;
    shutdown_notify.notify_one();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    if tokio::time::timeout(grace, server_task).await.is_err() {
        info!("graceful shutdown timed out, forcing exit");
    }

    flush_task.abort();
    bus_task.abort();

    let flushed = allocator.flush_floors();
    info!(flushed, "final seq floor flush");

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
