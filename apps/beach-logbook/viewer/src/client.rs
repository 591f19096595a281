use std::io;
use std::time::Duration;

use beach_logbook_core::{LineOutcome, LogSession, RunSink, TracingSink};
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::render::{write_run, RenderOptions};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme `{0}`; expected ws or wss")]
    UnsupportedScheme(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("failed to write run: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub server: Url,
    pub reconnect_delay: Duration,
    /// Stop after the first finished run (or the first disconnect).
    pub once: bool,
    pub render: RenderOptions,
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    RunFinished,
    Closed,
}

/// Server URL with `channel` set as the `?channel=` query parameter.
pub fn channel_url(server: &Url, channel: &str) -> Result<Url, ViewerError> {
    match server.scheme() {
        "ws" | "wss" => {}
        other => return Err(ViewerError::UnsupportedScheme(other.to_string())),
    }
    let mut url = server.clone();
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "channel")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("channel", channel);
    Ok(url)
}

pub fn run_title(channel: &str) -> String {
    format!("Execution #{channel}")
}

/// Follows `channel` until it ends (with `once`) or forever, reconnecting
/// after `reconnect_delay`. Every connection starts from an empty run.
pub async fn follow_channel<W: io::Write>(
    config: &ViewerConfig,
    channel: &str,
    out: &mut W,
) -> Result<(), ViewerError> {
    let url = channel_url(&config.server, channel)?;
    loop {
        let mut session = LogSession::new(run_title(channel), TracingSink::new(channel));
        let result = stream_once(&url, &mut session, config, out).await;
        match result {
            Ok(StreamEnd::RunFinished) if config.once => return Ok(()),
            Ok(StreamEnd::Closed) if config.once => {
                warn!(channel, "connection closed before the run finished");
                return Ok(());
            }
            Err(err) if config.once => return Err(err),
            Ok(_) => info!(
                channel,
                delay_ms = config.reconnect_delay.as_millis() as u64,
                "connection closed; reconnecting"
            ),
            Err(err) => warn!(
                channel,
                error = %err,
                delay_ms = config.reconnect_delay.as_millis() as u64,
                "connection failed; reconnecting"
            ),
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn stream_once<S: RunSink, W: io::Write>(
    url: &Url,
    session: &mut LogSession<S>,
    config: &ViewerConfig,
    out: &mut W,
) -> Result<StreamEnd, ViewerError> {
    let (mut socket, _) = connect_async(url.as_str()).await?;
    info!(url = %url, "connected");
    let end = consume(&mut socket, session, config.once, config.render, out).await;
    if let Err(err) = socket.close(None).await {
        debug!(error = %err, "close after stream end failed");
    }
    end
}

/// Feeds every text frame of `stream` to `session` in arrival order and
/// prints the tree each time a run finishes. Lines the aggregator rejects
/// are skipped, never the connection.
pub async fn consume<St, S, W>(
    stream: &mut St,
    session: &mut LogSession<S>,
    stop_after_run: bool,
    render: RenderOptions,
    out: &mut W,
) -> Result<StreamEnd, ViewerError>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    S: RunSink,
    W: io::Write,
{
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    warn!(bytes = bytes.len(), "dropping non UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    reason = ?frame.map(|f| f.reason.as_str().to_owned()),
                    "server closed websocket"
                );
                return Ok(StreamEnd::Closed);
            }
            Ok(_) => continue,
            Err(err) => return Err(err.into()),
        };

        for outcome in session.feed_lossy(&text) {
            if let LineOutcome::RunFinished { status } = outcome {
                info!(%status, title = %session.run().title, "run finished");
                write_run(out, session.run(), render)?;
                if stop_after_run {
                    return Ok(StreamEnd::RunFinished);
                }
            }
        }
    }
    Ok(StreamEnd::Closed)
}
