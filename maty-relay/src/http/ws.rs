//! Client WebSocket transport.
//!
//! Each upgraded socket gets an outbound queue from [`Relay::open_connection`].
//! A writer task drains the queue into the socket while the reader loop feeds
//! text frames to the relay. Binary frames are ignored.

use crate::server::Relay;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// Upgrade handler for `GET /`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(relay): Extension<Arc<Relay>>,
) -> Response {
    let Some((handle, mut outbound)) = relay.open_connection() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let max_size = relay.config().limits.max_message_size;

    ws.max_message_size(max_size)
        .on_failed_upgrade({
            let relay = relay.clone();
            let handle = handle.clone();
            move |e| {
                tracing::warn!("WebSocket upgrade failed: {}", e);
                relay.on_disconnect(&handle);
            }
        })
        .on_upgrade(move |socket: WebSocket| async move {
            tracing::info!("Client connected: connection {}", handle.id());
            let (mut sink, mut stream) = socket.split();

            let writer = tokio::spawn(async move {
                while let Some(frame) = outbound.recv().await {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => relay.on_message(&text, &handle).await,
                    Ok(Message::Binary(data)) => {
                        tracing::debug!(
                            "Ignoring {} byte binary frame from connection {}",
                            data.len(),
                            handle.id()
                        );
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("Connection {} read error: {}", handle.id(), e);
                        break;
                    }
                }
            }

            relay.on_disconnect(&handle);
            // Dropping the last sender ends the writer once the queue drains.
            drop(handle);
            let _ = writer.await;
            tracing::info!("Client disconnected");
        })
}
