use std::time::Duration;

use anyhow::{Context, Result};
use beach_logbook_viewer::{follow_channel, OutputFormat, RenderOptions, ViewerConfig};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "beach-logbook-viewer",
    author,
    version,
    about = "Follows Beach Logbook channels and prints each execution run as a tree"
)]
struct Cli {
    /// Server websocket URL.
    #[arg(long, env = "BEACH_LOGBOOK_URL", default_value = "ws://127.0.0.1:9090/")]
    url: String,

    /// Channel to follow; repeat to follow several at once.
    #[arg(
        long = "channel",
        env = "BEACH_LOGBOOK_CHANNELS",
        value_delimiter = ',',
        default_value = "default"
    )]
    channels: Vec<String>,

    /// Exit after the first finished run instead of reconnecting.
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Delay before reconnecting after the connection drops.
    #[arg(long, env = "BEACH_LOGBOOK_RECONNECT_DELAY_MS", default_value_t = 2000)]
    reconnect_delay_ms: u64,

    /// Print each finished run as one JSON document per line.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Leave log messages out of the text tree.
    #[arg(long, default_value_t = false)]
    no_logs: bool,
}

impl TryFrom<Cli> for ViewerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let server =
            Url::parse(&cli.url).with_context(|| format!("invalid server url: {}", cli.url))?;
        Ok(ViewerConfig {
            server,
            reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
            once: cli.once,
            render: RenderOptions {
                format: if cli.json {
                    OutputFormat::Json
                } else {
                    OutputFormat::Text
                },
                show_logs: !cli.no_logs,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    let cli = Cli::parse();
    let mut channels: Vec<String> = Vec::new();
    for channel in cli.channels.iter().map(|channel| channel.trim()) {
        if !channel.is_empty() && !channels.iter().any(|known| known == channel) {
            channels.push(channel.to_string());
        }
    }
    let config = ViewerConfig::try_from(cli)?;
    info!(server = %config.server, channels = ?channels, once = config.once, "starting viewer");

    let mut tasks = JoinSet::new();
    for channel in channels {
        let config = config.clone();
        tasks.spawn(async move {
            let mut out = std::io::stdout();
            let result = follow_channel(&config, &channel, &mut out).await;
            (channel, result)
        });
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; stopping viewer");
                tasks.abort_all();
                return Ok(());
            }
            joined = tasks.join_next() => match joined {
                None => return Ok(()),
                Some(Ok((channel, Ok(())))) => info!(channel, "channel finished"),
                Some(Ok((channel, Err(err)))) => {
                    warn!(channel, error = %err, "channel failed");
                    tasks.abort_all();
                    return Err(err).with_context(|| format!("following channel {channel}"));
                }
                Some(Err(err)) => return Err(err).context("viewer task panicked"),
            },
        }
    }
}
