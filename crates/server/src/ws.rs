//! WebSocket endpoint.
//!
//! One logical worker per connection: decode, gate, admit. The bearer token
//! travels as a `token` query parameter since websocket clients cannot set
//! arbitrary headers. On close the connection is detached from the cache
//! before the registry forgets the transport handle, so no recompute push
//! races a removed sender.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use querysync_shared::{Claims, ClientRequest, Error, ServerReply};

use crate::registry::ConnectionId;
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(state): State<AppState>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Result<Response, (StatusCode, String)> {
    let claims = authenticate(&state, &uri).map_err(|err| {
        tracing::warn!("websocket auth failed: {err}");
        (StatusCode::UNAUTHORIZED, err.to_string())
    })?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, claims, state)))
}

fn authenticate(state: &AppState, uri: &Uri) -> Result<Option<Claims>, Error> {
    let token = uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    });

    match token {
        Some(token) => Ok(Some(state.verifier.verify(&token)?)),
        None if state.require_token => Err(Error::Auth("missing token".into())),
        None => Ok(None),
    }
}

async fn handle_socket(socket: WebSocket, claims: Option<Claims>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let connection: ConnectionId = Uuid::new_v4();

    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<ServerReply>();
    state
        .registry
        .register(connection, forward_tx, claims.clone())
        .await;
    tracing::info!(%connection, "websocket connection open");

    // Forward pushes to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(reply) = forward_rx.recv().await {
            let json = match reply.to_json() {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!("failed to serialize reply: {err}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_message(&state, connection, claims.as_ref(), &text).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Detach before unregister so no push races a dropped handle.
    state.cache.detach(connection).await;
    state.registry.unregister(connection).await;
    send_task.abort();
    tracing::info!(%connection, "websocket connection closed");
}

async fn handle_message(
    state: &AppState,
    connection: ConnectionId,
    claims: Option<&Claims>,
    text: &str,
) {
    match ClientRequest::from_json(text) {
        Ok(request) => {
            if let Err(err) = state.gate.check(claims, &request.spec) {
                tracing::debug!(%connection, collection = %request.spec.collection, "request rejected: {err}");
                let reply = ServerReply::error(
                    &request.id,
                    Some(request.spec.kind),
                    &request.spec.collection,
                    &err,
                );
                state.registry.push(connection, reply).await;
                return;
            }
            state.cache.admit(request.spec, connection, &request.id).await;
        }
        Err(err) => {
            // Salvage the id if the message was at least JSON, so the client
            // can route the failure to a waiting subscriber.
            let id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|value| value.get("id").and_then(|id| id.as_str().map(str::to_owned)))
                .unwrap_or_default();
            let reply = ServerReply::error(id, None, "", &err);
            state.registry.push(connection, reply).await;
        }
    }
}
