//! `GET /ws`: one registry connection per socket.
//!
//! The registry only ever holds a strong reference to the socket's queue
//! transport. When it drops the connection (eviction, backpressure, shutdown)
//! the queue closes, the writer task ends and the socket is closed.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Map;
use tracing::{debug, warn};

use crate::realtime::{ConnectOptions, ConnectionRegistry, QueueTransport, Transport};

const SOURCE: &str = "infra::http::ws";

#[derive(Debug, Default, Deserialize)]
pub(super) struct WsParams {
    client_id: Option<String>,
    user_id: Option<String>,
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<super::AppState>,
) -> Response {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry, params))
}

async fn handle_socket(socket: WebSocket, registry: ConnectionRegistry, params: WsParams) {
    let (transport, mut outbound) = QueueTransport::channel(registry.config().outbound_buffer);
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let handle = Arc::downgrade(&transport);

    let options = ConnectOptions {
        client_id: params.client_id,
        user_id: params.user_id,
        metadata: Map::new(),
    };
    let id = match registry.register_with(transport, options) {
        Ok(id) => id,
        Err(err) => {
            warn!(component = SOURCE, error = %err, "welcome undeliverable, closing socket");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(err) => {
                    warn!(component = SOURCE, connection_id = %writer_id, error = %err, "failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => registry.dispatch_inbound(&id, text.as_str()),
                Some(Ok(Message::Binary(_))) => {
                    registry.report_error(&id, "Binary frames are not supported");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => registry.touch(&id),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(component = SOURCE, connection_id = %id, error = %err, "socket error");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    if let Some(transport) = handle.upgrade() {
        registry.release(&id, &transport);
    }
    writer.abort();
}
