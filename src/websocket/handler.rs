use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Interval;

use crate::auth::extract_credential;
use crate::error::AppError;
use crate::metrics::HandshakeMetrics;
use crate::server::AppState;
use crate::store::{Connection, StoreError};

/// A registered connection whose socket has not been attached yet.
#[derive(Debug)]
pub struct Session {
    pub connection: Connection,
    pub outbound: mpsc::Receiver<Bytes>,
}

/// WebSocket upgrade handler
///
/// The handshake is acknowledged only after the credential resolves to a
/// tenant and the connection has been recorded.
#[tracing::instrument(name = "ws.upgrade", skip_all)]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let credential = extract_credential(&query, &headers);

    let tenant_id = match state.auth_gate.authenticate(credential.as_deref()).await {
        Ok(tenant_id) => tenant_id,
        Err(e) => {
            HandshakeMetrics::record_rejected(e.as_label());
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let session = match establish(&state, &tenant_id).await {
        Ok(session) => session,
        Err(e) => {
            HandshakeMetrics::record_rejected("store_error");
            return AppError::Store(e).into_response();
        }
    };

    let cleanup_state = state.clone();
    let cleanup_connection = session.connection.clone();

    ws.on_failed_upgrade(move |e| {
        tracing::warn!(
            connection_id = %cleanup_connection.connection_id,
            error = %e,
            "WebSocket upgrade failed"
        );
        tokio::spawn(async move {
            release(&cleanup_state, &cleanup_connection).await;
        });
    })
    .on_upgrade(move |socket| handle_socket(socket, state, session))
}

/// Open an outbound queue for a new connection and record it.
///
/// The queue exists before the record so a broadcast that already sees the
/// record can deliver to it. Nothing is left behind when registration fails.
pub async fn establish(state: &AppState, tenant_id: &str) -> Result<Session, StoreError> {
    let (connection_id, outbound) = state.transport.open();

    match state.registry.register(tenant_id, &connection_id).await {
        Ok(connection) => Ok(Session {
            connection,
            outbound,
        }),
        Err(e) => {
            state.transport.close(&connection_id);
            tracing::error!(
                tenant_id = %tenant_id,
                connection_id = %connection_id,
                error = %e,
                "Failed to register connection, rejecting handshake"
            );
            Err(e)
        }
    }
}

/// Drop the outbound queue and the record of a finished connection.
pub async fn release(state: &AppState, connection: &Connection) {
    state.transport.close(&connection.connection_id);
    state
        .registry
        .deregister(&connection.tenant_id, &connection.connection_id)
        .await;
    HandshakeMetrics::record_closed();
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, session),
    fields(
        tenant_id = %session.connection.tenant_id,
        connection_id = %session.connection.connection_id,
        otel.kind = "server"
    )
)]
async fn handle_socket(socket: WebSocket, state: AppState, session: Session) {
    let Session {
        connection,
        mut outbound,
    } = session;
    let connection_start = Instant::now();

    tracing::info!("WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for forwarding broadcasts to the socket
    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if ws_sender.send(frame(payload)).await.is_err() {
                break;
            }
        }
    });

    // Task for reading the socket and keeping the record alive
    let recv_state = state.clone();
    let recv_connection = connection.clone();
    let recv_task = tokio::spawn(async move {
        let mut lease = recv_state.registry.ttl().map(renewal_interval);
        let mut current = recv_connection;
        let mut last_activity = Instant::now();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = Instant::now(),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                },
                _ = tick(&mut lease) => {
                    match recv_state.registry.renew(&current).await {
                        Ok(renewed) => current = renewed,
                        Err(e) => tracing::warn!(error = %e, "Failed to renew connection lease"),
                    }
                }
            }
        }

        last_activity.elapsed()
    });

    // Wait for either task to complete
    let mut send_task = send_task;
    let mut recv_task = recv_task;
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!("Send task completed");
            recv_task.abort();
        }
        idle = &mut recv_task => {
            if let Ok(idle) = idle {
                tracing::debug!(idle_secs = idle.as_secs(), "Receive task completed");
            }
            send_task.abort();
        }
    }

    release(&state, &connection).await;

    tracing::info!(
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// UTF-8 payloads go out as text frames, anything else as binary.
fn frame(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(payload),
    }
}

fn renewal_interval(ttl: Duration) -> Interval {
    let period = (ttl / 2).max(Duration::from_secs(1));
    tokio::time::interval_at(tokio::time::Instant::now() + period, period)
}

async fn tick(lease: &mut Option<Interval>) {
    match lease {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
