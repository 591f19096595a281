//! Terminal viewer for Beach Logbook channels.
//!
//! Connects to the server once per channel, feeds every received line to a
//! fresh [`beach_logbook_core::LogSession`] and prints the run tree whenever
//! a run finishes.

pub mod client;
pub mod render;

pub use client::{
    channel_url, consume, follow_channel, run_title, StreamEnd, ViewerConfig, ViewerError,
    DEFAULT_RECONNECT_DELAY,
};
pub use render::{render_text, write_run, OutputFormat, RenderOptions};
