//! `CourierServer` wires one Courier instance: the axum HTTP and WebSocket
//! listener plus the relay and dispatcher tasks, stopped by one shutdown token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use courier_bus::{Bus, BusError};
use courier_core::{ChatMessage, InstanceId};
use courier_store::SqliteStore;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::pipeline::IngressPipeline;
use crate::registry::ConnectionRegistry;
use crate::routing::{Dispatcher, DispatcherHandle, Relay, Router};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionContext, run_session};

/// Startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The relay could not subscribe to this instance's channel.
    #[error("relay subscription failed: {0}")]
    Subscribe(#[from] BusError),
    /// `listen` was already called.
    #[error("server already started")]
    AlreadyStarted,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session dependencies.
    pub session: Arc<SessionContext>,
    /// Account and room storage.
    pub store: Arc<SqliteStore>,
    /// Metrics renderer, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// One Courier instance.
pub struct CourierServer {
    config: ServerConfig,
    instance: InstanceId,
    store: Arc<SqliteStore>,
    bus: Arc<dyn Bus>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    dispatcher: DispatcherHandle,
    queue: Mutex<Option<mpsc::Receiver<ChatMessage>>>,
    session: Arc<SessionContext>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl CourierServer {
    /// Wire an instance over `store` and `bus`. Nothing runs until
    /// [`listen`](Self::listen).
    pub fn new(
        config: ServerConfig,
        instance: InstanceId,
        store: Arc<SqliteStore>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (dispatcher, queue) = Dispatcher::channel(config.queue_capacity, config.enqueue_timeout());

        let router = Arc::new(Router::new(
            instance.clone(),
            store.clone(),
            store.clone(),
            bus.clone(),
            dispatcher.clone(),
        ));
        let pipeline = Arc::new(IngressPipeline::new(router, store.clone()));
        let session = Arc::new(SessionContext {
            instance: instance.clone(),
            registry: registry.clone(),
            directory: store.clone(),
            identity: store.clone(),
            pipeline,
            config: config.clone(),
            shutdown: shutdown.token(),
        });

        Self {
            config,
            instance,
            store,
            bus,
            registry,
            shutdown,
            dispatcher,
            queue: Mutex::new(Some(queue)),
            session,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> axum::Router {
        let state = AppState {
            session: self.session.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        axum::Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .merge(crate::http::routes())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Subscribe the relay, bind, and spawn the serving tasks.
    ///
    /// Returns the bound address and a handle that completes once the
    /// listener, relay and dispatcher have all stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let queue = self.queue.lock().take().ok_or(ServerError::AlreadyStarted)?;

        let relay = Relay::new(
            self.instance.clone(),
            self.bus.clone(),
            self.dispatcher.clone(),
            self.config.resubscribe_delay(),
        );
        let subscription = relay.subscribe().await?;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr,
            source,
        })?;

        let token = self.shutdown.token();
        let dispatcher = Dispatcher::new(self.registry.clone(), self.config.write_timeout());
        let app = self.router();
        let instance = self.instance.clone();

        let handle = tokio::spawn(async move {
            let dispatcher_task = tokio::spawn(dispatcher.run(queue, token.clone()));
            let relay_task = tokio::spawn(relay.run(subscription, token.clone()));

            info!(instance = %instance, addr = %local_addr, "courier instance listening");
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(token.clone().cancelled_owned())
                .await
            {
                error!(%error, "server error");
                token.cancel();
            }

            let _ = dispatcher_task.await;
            let _ = relay_task.await;
            info!(instance = %instance, "courier instance stopped");
        });

        Ok((local_addr, handle))
    }

    /// This instance's id.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Local connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "server started" }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.session.instance,
        state.session.registry.len(),
        state.session.shutdown.is_cancelled(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, metrics::render(handle)),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

/// Query string of the upgrade request; `id` is the username.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    id: Option<String>,
}

/// GET /ws?id=<username>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session = state.session.clone();
    ws.max_message_size(session.config.max_message_size)
        .on_upgrade(move |socket| run_session(socket, params.id, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use courier_bus::LocalBus;
    use std::time::Duration;
    use tower::ServiceExt;

    fn make_server() -> CourierServer {
        let store = Arc::new(SqliteStore::in_memory(Duration::from_secs(300)).unwrap());
        CourierServer::new(
            ServerConfig::default(),
            "node-a".into(),
            store,
            Arc::new(LocalBus::new()),
        )
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or_default())
    }

    #[tokio::test]
    async fn root_reports_started() {
        let (status, body) = get_json(make_server().router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "server started");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_json(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["instance_id"], "node-a");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let (status, _) = get_json(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = make_server().with_metrics(handle).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let req = Request::builder().uri("/ws?id=alice").body(Body::empty()).unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_json(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(server.listen().await, Err(ServerError::AlreadyStarted)));

        let drain = server
            .shutdown()
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(5)))
            .await;
        assert_eq!(drain.aborted, 0);
    }

    #[test]
    fn accessors() {
        let server = make_server();
        assert_eq!(server.instance().as_str(), "node-a");
        assert!(server.registry().is_empty());
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().is_shutting_down());
    }
}
