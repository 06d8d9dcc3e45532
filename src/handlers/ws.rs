use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use crate::broadcast::SubscriberSender;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::survey::SurveyHandle;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state.survey))
}

async fn run_session(socket: WebSocket, survey: SurveyHandle) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer: the only place that touches the socket's send half.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(e) = survey.connect(id, tx.clone()).await {
        warn!("Could not register subscriber {}: {}", id, e);
        writer.abort();
        return;
    }

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_text(text.as_str(), &tx),
                Some(Ok(Message::Close(_))) | None => break,
                // Binary frames carry nothing; protocol pings are answered by axum.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Subscriber {} transport error: {}", id, e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    survey.disconnect(id).await;
    writer.abort();
}

fn handle_text(text: &str, tx: &SubscriberSender) {
    match ClientMessage::parse(text) {
        Some(ClientMessage::Ping) => {
            if let Some(frame) = protocol::encode(&ServerMessage::Pong) {
                let _ = tx.send(frame);
            }
        }
        None => debug!("Ignoring unrecognized client frame"),
    }
}
