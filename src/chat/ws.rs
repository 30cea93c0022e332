use std::time::Duration;

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};

use super::{protocol, Gateway};

/// How often the server pings an idle socket. A peer that has not answered
/// the previous ping by the next tick is disconnected.
#[derive(Debug, Clone, Copy)]
pub struct PingInterval(pub Duration);

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(gateway): State<Gateway>,
    State(PingInterval(ping_every)): State<PingInterval>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, gateway, ping_every))
}

async fn serve_socket(socket: WebSocket, gateway: Gateway, ping_every: Duration) {
    let (mut sender, mut receiver) = socket.split();
    let (mut session, mut rx) = gateway.connect();
    let connection_id = session.id();

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let mut push_task = tokio::spawn(async move {
        let mut ping = interval(ping_every);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;
        let mut awaiting_pong = false;

        loop {
            let frame = tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match serde_json::to_string(&event) {
                        Ok(text) => WsMessage::Text(text.into()),
                        Err(err) => {
                            tracing::warn!(%connection_id, error = %err, "could not encode event");
                            continue;
                        }
                    }
                }
                Some(()) = pong_rx.recv() => {
                    awaiting_pong = false;
                    continue;
                }
                _ = ping.tick() => {
                    if awaiting_pong {
                        tracing::info!(%connection_id, "pong timeout, closing socket");
                        let _ = sender
                            .send(WsMessage::Close(Some(CloseFrame {
                                code: close_code::AWAY,
                                reason: "pong timeout".into(),
                            })))
                            .await;
                        break;
                    }
                    awaiting_pong = true;
                    WsMessage::Ping(Bytes::new())
                }
            };

            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let data = match frame {
                    Some(Ok(WsMessage::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Pong(_))) => {
                        let _ = pong_tx.send(());
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::warn!(%connection_id, error = %err, "socket receive error");
                        break;
                    }
                };

                match protocol::decode(&data) {
                    Ok(event) => gateway.handle_event(&mut session, event).await,
                    Err(err) => tracing::debug!(%connection_id, error = %err, "ignoring malformed frame"),
                }
            }
            _ = &mut push_task => break,
        }
    }

    push_task.abort();
    gateway.disconnect(&mut session);
}
