use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use beach_logbook_server::{demo::demo_script, router, AppState, ChannelHub};
use beach_logbook_viewer::{follow_channel, OutputFormat, RenderOptions, ViewerConfig};
use tokio::net::TcpListener;
use url::Url;

async fn serve_on(listener: TcpListener) -> Arc<AppState> {
    let state = AppState::new(ChannelHub::default(), None);
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    state
}

fn config(addr: SocketAddr, once: bool) -> ViewerConfig {
    ViewerConfig {
        server: Url::parse(&format!("ws://{addr}/")).unwrap(),
        reconnect_delay: Duration::from_millis(50),
        once,
        render: RenderOptions {
            format: OutputFormat::Text,
            show_logs: true,
        },
    }
}

async fn wait_for_subscriber(state: &AppState, channel: &str) {
    while state.hub.subscriber_count(channel) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Output buffer the test can inspect while the viewer still runs.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test_timeout::tokio_timeout_test(30)]
async fn once_prints_the_first_finished_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = serve_on(listener).await;

    let config = config(addr, true);
    let viewer = tokio::spawn(async move {
        let mut out = Vec::new();
        follow_channel(&config, "dimr_15", &mut out)
            .await
            .map(|_| out)
    });

    wait_for_subscriber(&state, "dimr_15").await;
    for line in demo_script() {
        state.publish("dimr_15", line);
        state.publish("dimr_16", "[t] [Elsewhere] <Failed> other channel");
    }

    let out = viewer.await.unwrap().unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Execution #dimr_15 · Failed"), "{text}");
    assert!(text.contains("✗ Validating · Failed"));
    assert!(text.contains("✓ DNS · Success"));
    assert!(text.contains("✗ SSL · Failed"));
    assert!(text.contains("✓ Finishing Up · Success"));
    assert!(!text.contains("Elsewhere"));
    assert_eq!(text.matches("Execution #dimr_15").count(), 1);
}

#[test_timeout::tokio_timeout_test(30)]
async fn viewer_keeps_retrying_until_the_server_appears() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let out = SharedBuf::default();
    let viewer_out = out.clone();
    let config = config(addr, false);
    let viewer = tokio::spawn(async move {
        let mut out = viewer_out;
        follow_channel(&config, "dimr_16", &mut out).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = serve_on(TcpListener::bind(addr).await.unwrap()).await;
    wait_for_subscriber(&state, "dimr_16").await;

    for line in [
        "=== Execution Start ===",
        "[t] [Validating] <Success> Validated Request Method",
        "[DONE]",
    ] {
        state.publish("dimr_16", line);
    }

    while !out.text().contains("Execution #dimr_16 · Succeeded") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!viewer.is_finished());
    viewer.abort();
}
