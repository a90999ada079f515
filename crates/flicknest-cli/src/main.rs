//! `flicknest` – the symbol hub daemon.
//!
//! Startup order:
//!
//! 1. tracing, then configuration (`~/.flicknest/config.toml` + `FLICKNEST_*`);
//! 2. the symbol store (created on first start, legacy document imported);
//! 3. update bus, dispatcher, MQTT adapter and its reconnect supervisor;
//! 4. the HTTP and WebSocket listeners.
//!
//! The hub keeps serving HTTP and WebSocket clients when the MQTT broker is
//! unreachable. Ctrl-C cancels every task and waits for them to finish.

mod config;

use std::sync::Arc;

use anyhow::Context;
use flicknest_gateway::{AppState, RealtimeServer, http};
use flicknest_kernel::NameResolver;
use flicknest_memory::SymbolStore;
use flicknest_middleware::{
    ControlChannel, MqttAdapter, ReconnectSupervisor, TelemetryIngress, UpdateBus,
};
use flicknest_runtime::{Dispatcher, dispatcher, telemetry};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Dispatcher mailbox size.
const COMMAND_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = telemetry::init_tracing("flicknest-hub");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config error, using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(config = ?cfg, path = %config::config_path().display(), "configuration loaded");

    // ── State ─────────────────────────────────────────────────────────────
    let store = Arc::new(
        SymbolStore::open(&cfg.db_path)
            .with_context(|| format!("opening symbol store at {}", cfg.db_path.display()))?,
    );
    if let Some(legacy) = &cfg.legacy_document {
        match store.import_document(legacy) {
            Ok(0) => {}
            Ok(n) => info!(imported = n, path = %legacy.display(), "legacy symbols imported"),
            Err(e) => warn!(error = %e, "legacy import skipped"),
        }
    }
    let resolver = Arc::new(NameResolver::builtin());
    let bus = UpdateBus::default();
    let shutdown = CancellationToken::new();

    // ── Device link + dispatcher ──────────────────────────────────────────
    let (mqtt, eventloop) = MqttAdapter::new(cfg.mqtt_settings());
    let control: Arc<dyn ControlChannel> = Arc::clone(&mqtt) as Arc<dyn ControlChannel>;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        bus.clone(),
        Arc::clone(&control),
    ));
    let (handle, commands) = dispatcher::channel(COMMAND_CAPACITY);

    // ── Listeners ─────────────────────────────────────────────────────────
    let http_listener = TcpListener::bind((cfg.http_host.as_str(), cfg.http_port))
        .await
        .with_context(|| format!("binding HTTP on {}:{}", cfg.http_host, cfg.http_port))?;
    let ws_listener = TcpListener::bind((cfg.http_host.as_str(), cfg.ws_port))
        .await
        .with_context(|| format!("binding WebSocket on {}:{}", cfg.http_host, cfg.ws_port))?;

    let mut tasks = JoinSet::new();
    tasks.spawn(dispatcher.run(commands, shutdown.clone()));
    tasks.spawn(Arc::clone(&mqtt).run(
        eventloop,
        TelemetryIngress::new(Arc::clone(&resolver), handle.sender()),
        shutdown.clone(),
    ));
    tasks.spawn(
        ReconnectSupervisor::new(Arc::clone(&mqtt), cfg.reconnect_interval()).run(shutdown.clone()),
    );
    tasks.spawn(RealtimeServer::new(Arc::clone(&store), bus.clone()).serve(ws_listener, shutdown.clone()));

    let state = AppState {
        store: Arc::clone(&store),
        dispatcher: handle,
        resolver,
        control,
    };
    let http_shutdown = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = http::serve(http_listener, state, http_shutdown.clone()).await {
            error!(error = %e, "HTTP server failed");
            http_shutdown.cancel();
        }
    });

    info!(
        http_port = cfg.http_port,
        ws_port = cfg.ws_port,
        symbols = store.len(),
        "flicknest hub running"
    );

    // ── Shutdown ──────────────────────────────────────────────────────────
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        },
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "task ended abnormally");
        }
    }
    info!("flicknest hub stopped");
    Ok(())
}
