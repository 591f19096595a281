use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{validate_channel, HubError, DEFAULT_CHANNEL};
use crate::routes::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    channel: Option<String>,
}

impl ChannelQuery {
    /// The requested channel, falling back to `default` when the query
    /// parameter is missing or blank.
    pub fn resolve(&self) -> Result<String, HubError> {
        match self.channel.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_CHANNEL.to_string()),
            Some(channel) => validate_channel(channel).map(str::to_string),
        }
    }
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match query.resolve() {
        Ok(channel) => ws
            .on_upgrade(move |socket| handle_connection(socket, state, channel))
            .into_response(),
        Err(err) => {
            warn!(error = %err, "rejecting websocket subscriber");
            counter!("beach_logbook_subscribe_rejected_total", 1);
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
    }
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, channel: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let subscriber_id = Uuid::new_v4();
    let subscription = state.hub.subscribe(&channel, subscriber_id);
    state.on_subscriber_added(
        &channel,
        subscription.channel_subscribers,
        subscription.active_channels,
    );
    let mut rx = subscription.receiver;

    info!(
        channel = %channel,
        subscriber_id = %subscriber_id,
        subscribers = subscription.channel_subscribers,
        "viewer joined channel"
    );

    let writer_channel = channel.clone();
    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if ws_tx.send(Message::Text(line.to_string())).await.is_err() {
                break;
            }
        }
        debug!(
            channel = %writer_channel,
            subscriber_id = %subscriber_id,
            "writer task finished"
        );
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(
                    channel = %channel,
                    subscriber_id = %subscriber_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "viewer closed websocket"
                );
                break;
            }
            Ok(Message::Text(text)) => {
                // Viewers have nothing to say; the stream is one-way.
                debug!(
                    channel = %channel,
                    subscriber_id = %subscriber_id,
                    bytes = text.len(),
                    "ignoring inbound text frame"
                );
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(
                    channel = %channel,
                    subscriber_id = %subscriber_id,
                    error = %err,
                    "error receiving message"
                );
                break;
            }
        }
    }

    let removal = state.hub.unsubscribe(subscriber_id);
    state.on_subscriber_removed(
        &channel,
        removal.channel_subscribers,
        removal.active_channels,
    );
    counter!(
        "beach_logbook_subscribers_closed_total",
        1,
        "channel" => channel.clone()
    );
    writer.abort();

    info!(
        channel = %channel,
        subscriber_id = %subscriber_id,
        "viewer left channel"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(channel: Option<&str>) -> ChannelQuery {
        ChannelQuery {
            channel: channel.map(str::to_string),
        }
    }

    #[test_timeout::timeout]
    fn missing_or_blank_channel_falls_back_to_default() {
        assert_eq!(query(None).resolve().unwrap(), "default");
        assert_eq!(query(Some("")).resolve().unwrap(), "default");
        assert_eq!(query(Some("  ")).resolve().unwrap(), "default");
        assert_eq!(query(Some("dimr_15")).resolve().unwrap(), "dimr_15");
    }

    #[test_timeout::timeout]
    fn malformed_channel_is_rejected() {
        assert_eq!(
            query(Some("dimr 15")).resolve(),
            Err(HubError::InvalidChannel)
        );
    }
}
