// WebSocket endpoint: one task per connection, multiplexing the client's
// outbound queue with inbound frames.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use docsync_common::protocol::ws::{decode_message, encode_message, WsMessage};
use tracing::{debug, warn};

use crate::hub::Hub;

pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub async fn ws_handler(State(hub): State<Arc<Hub>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<Hub>, mut socket: WebSocket) {
    let (client_id, mut outbound_receiver) = hub.connect().await;

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                let Some(outbound_message) = maybe_outbound else {
                    break;
                };
                if send_ws_message(&mut socket, &outbound_message).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }
                        match decode_message(raw_message.as_str()) {
                            Ok(inbound) => hub.handle(&client_id, inbound).await,
                            Err(error) => {
                                warn!(client_id = %client_id, %error, "dropping malformed frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(client_id = %client_id, %error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(&client_id).await;
}

async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes").into(),
        })))
        .await;
}
