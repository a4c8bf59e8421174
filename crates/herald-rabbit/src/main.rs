//! herald-tap
//!
//! Attaches a subscriber to the configured queues and logs every envelope it
//! sees (type, emitter). Ops endpoints on `ops.listen`.
//!
//! Config: `herald-tap.yaml`, or the path in `HERALD_TAP_CONFIG`.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use herald_core::catalog::TypeCatalog;
use herald_rabbit::{config, ops, RabbitSubscriber};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("HERALD_TAP_CONFIG").unwrap_or_else(|_| "herald-tap.yaml".into());
    let cfg = config::load_from_file(&path).expect("config load failed");
    let listen: SocketAddr = cfg
        .ops
        .listen
        .parse()
        .expect("ops.listen must be a valid SocketAddr");

    let sub_cfg = cfg
        .subscriber_configuration()
        .expect("invalid subscriber settings")
        .with_dispatch_in_memory(false);

    let subscriber = Arc::new(
        RabbitSubscriber::connect(sub_cfg, Arc::new(TypeCatalog::new()))
            .expect("invalid connection settings")
            .with_envelope_observer(|env| {
                tracing::info!(
                    message_type = %env.data_type,
                    emiter = %env.emiter,
                    persistent = env.persistent_message,
                    expiration_ms = ?env.expiration_ms(),
                    bytes = env.data.len(),
                    "envelope"
                );
            }),
    );
    subscriber.start().await.expect("subscriber start failed");

    let app = ops::build_router(ops::OpsState::new(Arc::clone(&subscriber)));
    tracing::info!(%listen, service_id = %cfg.service_id, "herald-tap starting");
    let listener = tokio::net::TcpListener::bind(listen).await.expect("failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .expect("server failed");

    subscriber.stop().await;
}
