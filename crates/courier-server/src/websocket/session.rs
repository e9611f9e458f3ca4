//! WebSocket session lifecycle: one attached client from upgrade through
//! teardown.
//!
//! `Connecting → Authenticated → Streaming → Closed`. The read loop below
//! owns the inbound half; a spawned writer task owns the outbound half and
//! is the only code that writes to the socket once streaming starts.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use courier_core::{AuthenticationError, CONNECT_ACK, Directory, IdentityStore, InstanceId, UserId};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use super::connection::{ClientConnection, DEFAULT_CLOSE_REASON, REPLACED_CLOSE_REASON};
use crate::config::ServerConfig;
use crate::metrics::{
    WS_AUTH_FAILURES_TOTAL, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::pipeline::IngressPipeline;
use crate::registry::ConnectionRegistry;

/// Everything a session needs, shared by all sessions of one instance.
pub struct SessionContext {
    /// This instance.
    pub instance: InstanceId,
    /// Local connections.
    pub registry: Arc<ConnectionRegistry>,
    /// User → instance directory.
    pub directory: Arc<dyn Directory>,
    /// Known users.
    pub identity: Arc<dyn IdentityStore>,
    /// Frame handling.
    pub pipeline: Arc<IngressPipeline>,
    /// Timeouts and buffer sizes.
    pub config: ServerConfig,
    /// Instance-wide shutdown; each connection gets a child of it.
    pub shutdown: CancellationToken,
}

/// Resolve the claimed identity against the identity store.
pub async fn authenticate(
    identity: &dyn IdentityStore,
    claimed: Option<&str>,
) -> Result<UserId, AuthenticationError> {
    let claimed = claimed
        .filter(|c| !c.is_empty())
        .ok_or(AuthenticationError::MissingIdentity)?;
    match identity.find_user(claimed).await? {
        Some(user) => Ok(user.username),
        None => Err(AuthenticationError::UnknownUser(claimed.into())),
    }
}

fn close_message(reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.into(),
    }))
}

/// Run a session for an upgraded socket whose request claimed `claimed`.
#[instrument(skip_all, fields(user = tracing::field::Empty, conn_id = tracing::field::Empty))]
pub async fn run_session(mut ws: WebSocket, claimed: Option<String>, ctx: Arc<SessionContext>) {
    let user = match authenticate(ctx.identity.as_ref(), claimed.as_deref()).await {
        Ok(user) => user,
        Err(error) => {
            counter!(WS_AUTH_FAILURES_TOTAL).increment(1);
            info!(%error, "rejecting connection");
            let _ = ws
                .send(close_message(AuthenticationError::CLOSE_REASON.to_owned()))
                .await;
            return;
        }
    };

    let (send_tx, send_rx) = mpsc::channel(ctx.config.outbound_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(
        user.clone(),
        send_tx,
        ctx.shutdown.child_token(),
    ));
    let _ = Span::current()
        .record("user", tracing::field::display(&user))
        .record("conn_id", tracing::field::display(&connection.id));

    if let Some(previous) = ctx.registry.put(connection.clone()) {
        info!(replaced = %previous.id, "newer login replaces existing session");
        previous.close(REPLACED_CLOSE_REASON);
    }
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    if let Err(error) = ctx.directory.set_owner(&user, &ctx.instance).await {
        warn!(%error, "directory write failed, will retry on refresh");
    }

    if ws.send(Message::Text(CONNECT_ACK.to_owned().into())).await.is_ok() {
        info!("client connected");
        stream(ws, &connection, send_rx, &ctx).await;
    } else {
        connection.close(DEFAULT_CLOSE_REASON);
    }

    teardown(&connection, &ctx.registry, ctx.directory.as_ref(), &ctx.instance).await;
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(dropped = connection.drop_count(), "client disconnected");
}

async fn stream(
    ws: WebSocket,
    connection: &Arc<ClientConnection>,
    send_rx: mpsc::Receiver<Arc<String>>,
    ctx: &SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        connection.clone(),
        WriterTiming::from(&ctx.config),
    ));
    let writer_abort = writer.abort_handle();

    let mut refresh = tokio::time::interval(ctx.config.directory_refresh());
    let _ = refresh.tick().await;

    loop {
        tokio::select! {
            () = connection.closed() => break,
            _ = refresh.tick() => {
                match ctx.directory.refresh_owner(&connection.user, &ctx.instance).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("user logged in on another instance, closing stale session");
                        connection.close(REPLACED_CLOSE_REASON);
                    }
                    Err(error) => warn!(%error, "directory refresh failed"),
                }
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => text.to_owned(),
                        Err(_) => {
                            info!(len = data.len(), "received non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("client closed the connection");
                        break;
                    }
                    Some(Err(error)) => {
                        debug!(%error, "read error");
                        break;
                    }
                };

                if let Err(error) = ctx.pipeline.handle_text(&connection.user, &text).await {
                    debug!(%error, "frame rejected");
                    if !connection.send(Arc::new(error.reply())) {
                        info!("failed to enqueue reply (queue full or closed)");
                    }
                }
            }
        }
    }

    connection.close(DEFAULT_CLOSE_REASON);
    // The writer sends the close frame; give it one write timeout plus slack.
    let grace = ctx.config.write_timeout() + Duration::from_millis(100);
    if tokio::time::timeout(grace, writer).await.is_err() {
        writer_abort.abort();
    }
}

async fn teardown(
    connection: &ClientConnection,
    registry: &ConnectionRegistry,
    directory: &dyn Directory,
    instance: &InstanceId,
) {
    let user = &connection.user;
    let _ = registry.remove_if(user, &connection.id);
    if registry.contains(user) {
        debug!("newer local connection exists, keeping directory entry");
        return;
    }
    match directory.clear_owner(user, instance).await {
        Ok(true) if registry.contains(user) => {
            // A local reconnect wrote its entry before the clear landed.
            match directory.refresh_owner(user, instance).await {
                Ok(owned) => debug!(owned, "directory entry restored for newer local connection"),
                Err(error) => warn!(%error, "failed to restore directory entry"),
            }
        }
        Ok(cleared) => debug!(cleared, "directory entry released"),
        Err(error) => warn!(%error, "failed to clear directory entry"),
    }
}

#[derive(Clone, Copy)]
struct WriterTiming {
    heartbeat: Duration,
    pong_timeout: Duration,
    write_timeout: Duration,
}

impl From<&ServerConfig> for WriterTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    timeout: Duration,
) -> bool {
    matches!(tokio::time::timeout(timeout, ws_tx.send(message)).await, Ok(Ok(())))
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    timing: WriterTiming,
) {
    let mut ping_interval = tokio::time::interval(timing.heartbeat);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            () = connection.closed() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let message = Message::Text(frame.as_ref().clone().into());
                if !write_frame(&mut ws_tx, message, timing.write_timeout).await {
                    debug!("socket write failed");
                    connection.close(DEFAULT_CLOSE_REASON);
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > timing.pong_timeout {
                    warn!("client unresponsive for {:?}, disconnecting", timing.pong_timeout);
                    connection.close(DEFAULT_CLOSE_REASON);
                    break;
                }
                if !write_frame(&mut ws_tx, Message::Ping(vec![].into()), timing.write_timeout).await {
                    connection.close(DEFAULT_CLOSE_REASON);
                    break;
                }
            }
        }
    }

    let _ = write_frame(
        &mut ws_tx,
        close_message(connection.close_reason()),
        timing.write_timeout,
    )
    .await;
}
