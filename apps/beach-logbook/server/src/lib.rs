//! Beach Logbook server: fans execution-log lines out to live viewers.
//!
//! Producers push lines over HTTP (or the built-in demo replay does);
//! viewers subscribe to one channel over a websocket and receive each line
//! as a text frame. Nothing is stored: a line published while nobody is
//! listening is gone.

pub mod config;
pub mod demo;
pub mod hub;
pub mod ingest;
pub mod routes;
pub mod telemetry;
pub mod websocket;

pub use config::{Cli, DemoConfig, ServerConfig};
pub use hub::{
    ChannelHub, ChannelSnapshot, HubConfig, HubError, PublishReport, Removal, SubscriberId,
    Subscription, DEFAULT_CHANNEL,
};
pub use ingest::{IngestError, IngestResponse};
pub use routes::{router, AppState, ChannelStatsEntry, StatsResponse};
