//! End-to-end streaming over a real websocket
//!
//! A minimal Engine.IO/Socket.IO server runs on a loopback port and answers
//! every `image` event the way the lane-detection backend does.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use image::{Rgb, RgbImage};
use lanevision::{
    ClientConfig, ConnectionState, Endpoint, ErrorKind, JpegQuality, LaneVision, MediaSource,
    SessionState, StreamError,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy)]
enum Backend {
    Lanes,
    Broken,
}

#[derive(Default)]
struct Counters {
    images: AtomicUsize,
    pongs: AtomicUsize,
}

async fn start_server(backend: Backend) -> (u16, Arc<Counters>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let counters = Arc::new(Counters::default());

    let shared = counters.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(serve_socket(tcp, backend, shared.clone()));
        }
    });

    (port, counters)
}

async fn serve_socket(tcp: TcpStream, backend: Backend, counters: Arc<Counters>) {
    let Ok(mut ws) = accept_async(tcp).await else {
        return;
    };

    let open = json!({
        "sid": "e2e",
        "upgrades": [],
        "pingInterval": 25000,
        "pingTimeout": 20000,
        "maxPayload": 1_000_000,
    });
    if ws.send(Message::Text(format!("0{}", open).into())).await.is_err() {
        return;
    }
    // Exercise the heartbeat right away
    let _ = ws.send(Message::Text("2".into())).await;

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let reply = match text.as_str() {
            "3" => {
                counters.pongs.fetch_add(1, Ordering::SeqCst);
                None
            }
            "40" => Some(r#"40{"sid":"e2e-socket"}"#.to_string()),
            "41" => break,
            other => match other.strip_prefix("42") {
                Some(body) => {
                    let data: Vec<Value> = serde_json::from_str(body).unwrap_or_default();
                    if data.first().and_then(Value::as_str) != Some("image") {
                        continue;
                    }
                    counters.images.fetch_add(1, Ordering::SeqCst);
                    let answer = match backend {
                        Backend::Lanes => json!(["response_back", data[1]]),
                        Backend::Broken => json!(["processing_error", { "error": "model not loaded" }]),
                    };
                    Some(format!("42{}", answer))
                }
                None => None,
            },
        };
        if let Some(reply) = reply {
            if ws.send(Message::Text(reply.into())).await.is_err() {
                break;
            }
        }
    }
}

fn config(port: u16) -> ClientConfig {
    ClientConfig {
        endpoint: Endpoint::new("127.0.0.1", port),
        refresh_hz: Some(30),
        connect_timeout_ms: 2000,
        ..ClientConfig::default()
    }
}

fn clip(frames: usize) -> MediaSource {
    let frames = (0..frames)
        .map(|i| {
            let shade = (i * 40 % 256) as u8;
            let image = RgbImage::from_fn(64, 48, |x, y| Rgb([shade, (x * 4) as u8, (y * 5) as u8]));
            (image, Duration::from_millis(50))
        })
        .collect();
    MediaSource::from_frames("drive.gif", frames, JpegQuality::DEFAULT)
}

async fn finished(client: &lanevision::StreamClient) -> lanevision::SessionSnapshot {
    tokio::time::timeout(
        Duration::from_secs(10),
        client.wait_for(|s| matches!(s.state, SessionState::Ended | SessionState::Error)),
    )
    .await
    .expect("session did not finish")
    .unwrap()
}

#[tokio::test]
async fn streams_a_clip_through_the_service() {
    let (port, counters) = start_server(Backend::Lanes).await;
    let client = LaneVision::connect(config(port)).await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client.upload_source(Box::new(clip(6))).await.unwrap();
    client.start().await.unwrap();

    let snapshot = finished(&client).await;
    assert_eq!(snapshot.state, SessionState::Ended);
    assert!(snapshot.stats.frames_sent >= 1);
    assert_eq!(snapshot.stats.results_received, snapshot.stats.frames_sent);
    assert_eq!(counters.images.load(Ordering::SeqCst) as u64, snapshot.stats.frames_sent);
    assert!(snapshot.stats.last_round_trip.is_some());
    assert!(counters.pongs.load(Ordering::SeqCst) >= 1);

    let shown = client.display().frame.expect("a processed frame is displayed");
    assert_eq!(shown.mime, "image/jpeg");
    assert_eq!(&shown.data[..2], &[0xFF, 0xD8]);

    // Ended sessions can be played again
    client.restart().await.unwrap();
    let again = finished(&client).await;
    assert_eq!(again.state, SessionState::Ended);
}

#[tokio::test]
async fn backend_errors_do_not_stop_the_stream() {
    let (port, counters) = start_server(Backend::Broken).await;
    let client = LaneVision::connect(config(port)).await.unwrap();

    client.upload_source(Box::new(clip(4))).await.unwrap();
    client.start().await.unwrap();

    let snapshot = finished(&client).await;
    assert_eq!(snapshot.state, SessionState::Ended);
    assert!(snapshot.stats.processing_errors >= 1);
    assert_eq!(snapshot.stats.processing_errors as usize, counters.images.load(Ordering::SeqCst));
    assert_eq!(client.display().error.as_deref(), Some("Backend Error: model not loaded"));
    assert!(client.display().frame.is_none());
}

#[tokio::test]
async fn unreachable_service_is_reported_on_the_session() {
    // Grab a free port and close it again
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = LaneVision::connect(config(port)).await.unwrap();
    let snapshot = client.wait_for(|s| s.last_error.is_some()).await.unwrap();
    let error = snapshot.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Connection);
    assert!(error.message.starts_with("Cannot connect to server"), "{}", error.message);

    client.upload_source(Box::new(clip(2))).await.unwrap();
    let err = client.start().await.unwrap_err();
    assert!(matches!(err, StreamError::NotConnected { .. }));

    // The reconnect it triggered fails the same way
    let snapshot = client.wait_for(|s| s.state == SessionState::Error).await.unwrap();
    assert_eq!(snapshot.source_name.as_deref(), Some("drive.gif"));
}

#[tokio::test]
async fn start_without_media_asks_for_an_upload() {
    let (port, _counters) = start_server(Backend::Lanes).await;
    let client = LaneVision::connect(config(port)).await.unwrap();

    let err = client.start().await.unwrap_err();
    assert!(err.to_string().contains("Please upload a video first"));
    assert_eq!(client.snapshot().state, SessionState::Idle);
}
