use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;

use crate::hub::{validate_channel, HubConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub hub: HubConfig,
    pub shutdown_grace: Duration,
    pub demo: Option<DemoConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    pub channels: Vec<String>,
    pub interval: Duration,
    pub start_delay: Duration,
    pub repeat: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "beach-logbook-server",
    author,
    version,
    about = "Streams execution-log lines to live viewers, one channel per job"
)]
pub struct Cli {
    /// Address to bind the websocket listener to.
    #[arg(
        long,
        env = "BEACH_LOGBOOK_LISTEN_ADDR",
        default_value = "0.0.0.0:9090"
    )]
    pub listen_addr: String,

    /// Lines buffered per subscriber before new lines are dropped for it.
    #[arg(
        long,
        env = "BEACH_LOGBOOK_SUBSCRIBER_BUFFER",
        default_value_t = 256
    )]
    pub subscriber_buffer: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_LOGBOOK_SHUTDOWN_GRACE_SECS", default_value_t = 1)]
    pub shutdown_grace_secs: u64,

    /// Channels that receive the scripted demo execution log.
    #[arg(
        long,
        env = "BEACH_LOGBOOK_DEMO_CHANNELS",
        value_delimiter = ','
    )]
    pub demo_channels: Vec<String>,

    /// Delay between demo lines.
    #[arg(long, env = "BEACH_LOGBOOK_DEMO_INTERVAL_MS", default_value_t = 1000)]
    pub demo_interval_ms: u64,

    /// Wait this long after startup before the first demo line.
    #[arg(long, env = "BEACH_LOGBOOK_DEMO_START_DELAY_MS", default_value_t = 0)]
    pub demo_start_delay_ms: u64,

    /// Replay the demo log forever instead of once.
    #[arg(long, env = "BEACH_LOGBOOK_DEMO_REPEAT", default_value_t = false)]
    pub demo_repeat: bool,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.subscriber_buffer == 0 {
            bail!("subscriber buffer must hold at least one line");
        }

        let channels = cli
            .demo_channels
            .iter()
            .map(|channel| channel.trim())
            .filter(|channel| !channel.is_empty())
            .map(|channel| {
                validate_channel(channel)
                    .map(str::to_string)
                    .with_context(|| format!("invalid demo channel: {channel}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let demo = if channels.is_empty() {
            None
        } else {
            if cli.demo_interval_ms == 0 {
                bail!("demo interval must be greater than zero");
            }
            Some(DemoConfig {
                channels,
                interval: Duration::from_millis(cli.demo_interval_ms),
                start_delay: Duration::from_millis(cli.demo_start_delay_ms),
                repeat: cli.demo_repeat,
            })
        };

        Ok(ServerConfig {
            listen_addr,
            hub: HubConfig {
                per_subscriber_buffer: cli.subscriber_buffer,
            },
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            demo,
        })
    }
}
