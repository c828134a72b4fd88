use crate::error::AppError;
use crate::session::{FossilKey, FossilSession, GasSession, HomeSession, VaultSession};
use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use database::{DbError, DbRepository};
use events::{
    FossilStatusPayload, FossilSubscription, GasBlockUpdate, GasSnapshot, GasSubscription,
    HomeSnapshot, VaultSnapshot, VaultSubscription, VaultUpdateRequest, WsMessage,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use models::UserRole;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Every outbound write gets this long before the session is torn down.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ==============================================================================
// Upgrade handlers, one per topic kind
// ==============================================================================

/// # GET /subscribeHome
pub async fn subscribe_home(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, headers, ws, serve_home)
}

/// # GET /subscribeVault
pub async fn subscribe_vault(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, headers, ws, serve_vault)
}

/// # GET /subscribeGas
pub async fn subscribe_gas(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, headers, ws, serve_gas)
}

/// # GET /subscribeFossil
pub async fn subscribe_fossil(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, headers, ws, serve_fossil)
}

fn upgrade<F, Fut>(
    state: Arc<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    serve: F,
) -> Response
where
    F: FnOnce(WebSocket, Arc<AppState>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
{
    if !origin_allowed(&state, &headers) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| async move {
        match serve(socket, state).await {
            Ok(()) => {}
            Err(AppError::Socket(e)) => tracing::debug!(error = %e, "session transport closed"),
            Err(e) => tracing::warn!(error = %e, "session ended with error"),
        }
    })
}

fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(allowed) = &state.allowed_origin else {
        return true;
    };
    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| origin == allowed)
}

// ==============================================================================
// Per-topic session loops
// ==============================================================================

async fn serve_home(socket: WebSocket, state: Arc<AppState>) -> Result<(), AppError> {
    let (mut sink, stream) = socket.split();
    let cancel = state.shutdown.child_token();
    let (session, mut rx) = HomeSession::new(cancel.clone());
    let session = Arc::new(session);
    state.registry.add_home(Arc::clone(&session));
    tracing::info!(session = %session.outbox.id(), "home session subscribed");

    let result = async {
        let vault_addresses = state.db_repo.get_all_vault_addresses().await?;
        let snapshot = WsMessage::InitialHome(HomeSnapshot { vault_addresses });
        write_with_deadline(&mut sink, snapshot.to_json()?).await?;

        tokio::spawn(drain_socket(stream, cancel.clone()));
        relay(&mut sink, &mut rx, &cancel, &state.shutdown).await
    }
    .await;

    cancel.cancel();
    state.registry.remove_home(session.outbox.id());
    result
}

async fn serve_vault(socket: WebSocket, state: Arc<AppState>) -> Result<(), AppError> {
    let (mut sink, mut stream) = socket.split();
    let sub: VaultSubscription = match read_handshake(&mut stream).await {
        Ok(sub) => sub,
        Err(e) => {
            close_with_protocol_error(&mut sink).await;
            return Err(e);
        }
    };

    let cancel = state.shutdown.child_token();
    let (session, mut rx) = VaultSession::new(sub, cancel.clone());
    let session = Arc::new(session);
    state.registry.add_vault(Arc::clone(&session));
    tracing::info!(session = %session.outbox.id(), vault = %session.vault_address,
        role = ?session.role, "vault session subscribed");

    let result = async {
        let snapshot = vault_snapshot(&state.db_repo, &session).await?;
        write_with_deadline(&mut sink, snapshot.to_json()?).await?;

        tokio::spawn(vault_read_loop(
            stream,
            Arc::clone(&state),
            Arc::clone(&session),
            cancel.clone(),
        ));
        relay(&mut sink, &mut rx, &cancel, &state.shutdown).await
    }
    .await;

    cancel.cancel();
    state.registry.remove_vault(&session);
    result
}

async fn serve_gas(socket: WebSocket, state: Arc<AppState>) -> Result<(), AppError> {
    let (mut sink, mut stream) = socket.split();
    let sub: GasSubscription = match read_handshake(&mut stream).await {
        Ok(sub) => sub,
        Err(e) => {
            close_with_protocol_error(&mut sink).await;
            return Err(e);
        }
    };

    let cancel = state.shutdown.child_token();
    let (session, mut rx) = match GasSession::new(&sub, cancel.clone()) {
        Ok(pair) => pair,
        Err(e) => {
            close_with_protocol_error(&mut sink).await;
            return Err(AppError::Protocol(e.to_string()));
        }
    };
    let session = Arc::new(session);
    state.registry.add_gas(Arc::clone(&session));
    tracing::info!(session = %session.outbox.id(), window = ?session.window, "gas session subscribed");

    let result = async {
        let blocks = state
            .db_repo
            .get_blocks_in_range(sub.start_timestamp, sub.end_timestamp)
            .await?;
        let updates: Vec<GasBlockUpdate> = blocks
            .iter()
            .map(|b| GasBlockUpdate::from_block(b, session.window))
            .collect();
        let snapshot = WsMessage::InitialGas(GasSnapshot { blocks: updates });
        write_with_deadline(&mut sink, snapshot.to_json()?).await?;

        tokio::spawn(drain_socket(stream, cancel.clone()));
        relay(&mut sink, &mut rx, &cancel, &state.shutdown).await
    }
    .await;

    cancel.cancel();
    state.registry.remove_gas(session.outbox.id());
    result
}

async fn serve_fossil(socket: WebSocket, state: Arc<AppState>) -> Result<(), AppError> {
    let (mut sink, mut stream) = socket.split();
    let sub: FossilSubscription = match read_handshake(&mut stream).await {
        Ok(sub) => sub,
        Err(e) => {
            close_with_protocol_error(&mut sink).await;
            return Err(e);
        }
    };

    let key = FossilKey {
        vault_address: sub.vault_address.clone(),
        target_time: sub.target_time,
    };
    let cancel = state.shutdown.child_token();
    let (session, mut rx) = FossilSession::new(key.clone(), cancel.clone());
    let session = Arc::new(session);
    state.registry.add_fossil(Arc::clone(&session));
    tracing::info!(session = %session.outbox.id(), vault = %key.vault_address,
        target_time = key.target_time, "fossil session subscribed");

    let result = async {
        let payload = match state
            .jobs
            .ensure_job(key.clone(), sub.duration, &sub.client_address)
            .await
        {
            Ok(status) => FossilStatusPayload {
                status: Some(status),
                error: None,
            },
            Err(e) => {
                // Surface the failure once, then end the session.
                let payload = FossilStatusPayload {
                    status: None,
                    error: Some(e.to_string()),
                };
                let msg = WsMessage::FossilStatus(payload).to_json()?;
                let _ = write_with_deadline(&mut sink, msg).await;
                return Err(e.into());
            }
        };
        let msg = WsMessage::FossilStatus(payload).to_json()?;
        write_with_deadline(&mut sink, msg).await?;

        tokio::spawn(drain_socket(stream, cancel.clone()));
        relay(&mut sink, &mut rx, &cancel, &state.shutdown).await
    }
    .await;

    cancel.cancel();
    state.registry.remove_fossil(&session);
    result
}

// ==============================================================================
// Shared plumbing
// ==============================================================================

/// Builds the one-time vault snapshot for a session's current address and
/// role. Also reused for refinement re-fetches after an address update.
async fn vault_snapshot(
    db_repo: &DbRepository,
    session: &VaultSession,
) -> Result<WsMessage, AppError> {
    let vault_state = db_repo.get_vault_state(&session.vault_address).await?;
    let option_round_states = db_repo
        .get_option_rounds_by_vault(&session.vault_address)
        .await?;

    let (liquidity_provider_state, option_buyer_states) = match session.role {
        UserRole::LiquidityProvider => {
            // A provider who has not deposited yet has no row; that is not
            // a handshake failure.
            match db_repo
                .get_liquidity_provider_state(&session.address(), &session.vault_address)
                .await
            {
                Ok(state) => (Some(state), None),
                Err(DbError::NotFound) => (None, None),
                Err(e) => return Err(e.into()),
            }
        }
        UserRole::OptionBuyer => (
            None,
            Some(
                db_repo
                    .get_option_buyers_by_address(&session.address())
                    .await?,
            ),
        ),
    };

    Ok(WsMessage::InitialVault(VaultSnapshot {
        vault_state,
        option_round_states,
        liquidity_provider_state,
        option_buyer_states,
    }))
}

/// The outbound relay: forwards queued messages to the socket until the
/// queue closes, the session is cancelled, or a write misses its deadline.
async fn relay(
    sink: &mut SplitSink<WebSocket, Message>,
    rx: &mut mpsc::Receiver<String>,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
) -> Result<(), AppError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Eviction gets a policy-violation close; process shutdown
                // a plain one. Either way the send is best-effort.
                let frame = if shutdown.is_cancelled() {
                    CloseFrame {
                        code: close_code::RESTART,
                        reason: "server shutting down".into(),
                    }
                } else {
                    CloseFrame {
                        code: close_code::POLICY,
                        reason: "connection too slow to keep up with messages".into(),
                    }
                };
                close_with_deadline(sink, frame).await;
                return Ok(());
            }
            msg = rx.recv() => match msg {
                Some(msg) => write_with_deadline(sink, msg).await?,
                None => return Ok(()),
            }
        }
    }
}

/// Reads and refinement-handles inbound frames on a vault session. An
/// address update re-fetches the snapshot for the new address and enqueues
/// it like any other message.
async fn vault_read_loop(
    mut stream: SplitStream<WebSocket>,
    state: Arc<AppState>,
    session: Arc<VaultSession>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                let request: VaultUpdateRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(session = %session.outbox.id(), error = %e,
                            "malformed refinement request");
                        cancel.cancel();
                        return;
                    }
                };
                if request.updated_field != "address" {
                    tracing::warn!(session = %session.outbox.id(), field = %request.updated_field,
                        "unsupported refinement field");
                    cancel.cancel();
                    return;
                }
                session.set_address(request.updated_value);
                match vault_snapshot(&state.db_repo, &session).await {
                    Ok(snapshot) => match snapshot.to_json() {
                        Ok(json) => session.outbox.deliver_or_evict(json),
                        Err(e) => tracing::error!(error = %e, "failed to serialize refreshed snapshot"),
                    },
                    Err(e) => {
                        tracing::warn!(session = %session.outbox.id(), error = %e,
                            "refinement re-fetch failed");
                        cancel.cancel();
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                cancel.cancel();
                return;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(session = %session.outbox.id(), error = %e, "read side closed");
                cancel.cancel();
                return;
            }
        }
    }
}

/// Consumes inbound frames on sessions without a read duty, purely to
/// notice the peer going away and cancel the session.
async fn drain_socket(mut stream: SplitStream<WebSocket>, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                cancel.cancel();
                return;
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Waits for the first text frame and parses it as the subscription
/// descriptor. Anything unparseable is a protocol error; the session never
/// registers.
async fn read_handshake<T: DeserializeOwned>(
    stream: &mut SplitStream<WebSocket>,
) -> Result<T, AppError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| AppError::Protocol(format!("malformed subscription: {e}")));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(AppError::Protocol(
                    "connection closed before subscribing".into(),
                ));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(AppError::Socket(e)),
        }
    }
}

async fn close_with_protocol_error<S>(sink: &mut S)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    close_with_deadline(
        sink,
        CloseFrame {
            code: close_code::PROTOCOL,
            reason: "malformed subscription".into(),
        },
    )
    .await;
}

/// Best-effort close frame under the write deadline. The peer being closed
/// is often exactly the one not draining its socket, so this send must not
/// be allowed to hold up registry removal.
async fn close_with_deadline<S>(sink: &mut S, frame: CloseFrame<'static>)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let _ = tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await;
}

/// Sends one message with the per-write deadline. A miss is an error
/// transition: the caller tears the session down.
async fn write_with_deadline<S>(sink: &mut S, msg: String) -> Result<(), AppError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(msg)))
        .await
        .map_err(|_| AppError::WriteTimeout)?
        .map_err(AppError::Socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A sink whose peer never drains its socket: every poll stays pending.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = axum::Error;

        fn poll_ready(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_frame_to_a_stalled_peer_is_bounded_by_the_deadline() {
        let mut sink = StalledSink;
        let before = tokio::time::Instant::now();
        close_with_deadline(
            &mut sink,
            CloseFrame {
                code: close_code::POLICY,
                reason: "connection too slow to keep up with messages".into(),
            },
        )
        .await;
        // The send returns at the deadline instead of waiting on the peer,
        // so teardown (registry removal) is never held up by it.
        assert_eq!(before.elapsed(), WRITE_TIMEOUT, "returned exactly at the deadline");
    }

    #[tokio::test(start_paused = true)]
    async fn write_to_a_stalled_peer_times_out_as_an_error() {
        let mut sink = StalledSink;
        let err = write_with_deadline(&mut sink, "update".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WriteTimeout));
    }
}
