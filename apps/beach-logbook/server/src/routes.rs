use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::hub::{ChannelHub, PublishReport};
use crate::{ingest, websocket};

pub struct AppState {
    pub hub: ChannelHub,
    metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub active_channels: usize,
    pub active_subscribers: usize,
    pub channels: Vec<ChannelStatsEntry>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStatsEntry {
    pub channel: String,
    pub subscribers: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(websocket::ws_handler))
        .route("/ws", get(websocket::ws_handler))
        .route("/channels/:channel/lines", post(ingest::ingest_handler))
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

impl AppState {
    pub fn new(hub: ChannelHub, metrics: Option<PrometheusHandle>) -> Arc<Self> {
        Arc::new(Self { hub, metrics })
    }

    /// Publishes one line through the hub and records what happened to it.
    pub fn publish(&self, channel: &str, line: &str) -> PublishReport {
        let report = self.hub.publish(channel, line);
        let channel_label = channel.to_string();
        counter!(
            "beach_logbook_lines_published_total",
            1,
            "channel" => channel_label.clone()
        );
        if report.delivered > 0 {
            counter!(
                "beach_logbook_lines_delivered_total",
                report.delivered as u64,
                "channel" => channel_label.clone()
            );
            counter!(
                "beach_logbook_bytes_delivered_total",
                report.bytes as u64,
                "channel" => channel_label.clone()
            );
        }
        histogram!(
            "beach_logbook_line_size_bytes",
            line.len() as f64,
            "channel" => channel_label
        );
        report
    }

    pub(crate) fn on_subscriber_added(&self, channel: &str, subscribers: usize, channels: usize) {
        gauge!(
            "beach_logbook_subscribers_active",
            subscribers as f64,
            "channel" => channel.to_string()
        );
        gauge!("beach_logbook_channels_active", channels as f64);
        counter!(
            "beach_logbook_subscribers_total",
            1,
            "channel" => channel.to_string()
        );
    }

    pub(crate) fn on_subscriber_removed(&self, channel: &str, subscribers: usize, channels: usize) {
        gauge!(
            "beach_logbook_subscribers_active",
            subscribers as f64,
            "channel" => channel.to_string()
        );
        gauge!("beach_logbook_channels_active", channels as f64);
    }

    pub fn stats(&self) -> StatsResponse {
        let snapshot = self.hub.snapshot();
        let active_subscribers = snapshot.iter().map(|entry| entry.subscribers).sum();
        StatsResponse {
            active_channels: snapshot.len(),
            active_subscribers,
            channels: snapshot
                .into_iter()
                .map(|entry| ChannelStatsEntry {
                    channel: entry.channel,
                    subscribers: entry.subscribers,
                })
                .collect(),
        }
    }
}
