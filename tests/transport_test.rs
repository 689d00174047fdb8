// Integration tests for the socket driver against a mock STOMP broker

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use livedash::config::LivedashConfig;
use livedash::transport::{
    run_transport, Command, ConnectionManager, ConnectionState, Frame, TransportConfig,
    DEVICES_TOPIC, LOGS_TOPIC,
};
use livedash::Dashboard;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Frames the broker received, tagged with the session they arrived on
type Inbox = mpsc::UnboundedSender<(usize, Frame)>;

#[derive(Clone)]
struct Broker {
    inbox: Inbox,
    sessions: Arc<AtomicUsize>,
    /// Body published to every new subscription
    publish: Arc<Mutex<Option<String>>>,
    /// How the first session misbehaves; later sessions are well-behaved
    mode: Mode,
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Normal,
    /// Close the socket right after CONNECTED
    DropFirst,
    /// Answer the first SUBSCRIBE with a STOMP ERROR frame
    ErrorOnSubscribe,
    /// Promise heart-beats in CONNECTED, then send nothing
    SilentFirst,
    /// Send undecodable frames ahead of every MESSAGE
    GarbageBeforeMessage,
}

async fn ws_handler(ws: WebSocketUpgrade, State(broker): State<Broker>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, broker))
}

async fn run_session(mut socket: WebSocket, broker: Broker) {
    let session = broker.sessions.fetch_add(1, Ordering::SeqCst);

    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(Some(frame)) = Frame::decode(&text) else {
            continue;
        };
        let _ = broker.inbox.send((session, frame.clone()));

        match frame.command {
            Command::Connect => {
                let first = session == 0;
                let heart_beat = if first && broker.mode == Mode::SilentFirst {
                    "100,0"
                } else {
                    "0,0"
                };
                let connected = Frame::new(Command::Connected)
                    .header("version", "1.2")
                    .header("heart-beat", heart_beat);
                if socket.send(Message::Text(connected.encode())).await.is_err() {
                    return;
                }
                if first && broker.mode == Mode::DropFirst {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return;
                }
            }
            Command::Subscribe if session == 0 && broker.mode == Mode::ErrorOnSubscribe => {
                let error = Frame::new(Command::Error)
                    .header("message", "subscription refused")
                    .with_body("not authorised");
                let _ = socket.send(Message::Text(error.encode())).await;
                return;
            }
            Command::Subscribe => {
                let body = broker.publish.lock().unwrap().clone();
                if let Some(body) = body {
                    if broker.mode == Mode::GarbageBeforeMessage {
                        for garbage in [
                            "BOGUS\n\n\0",
                            "MESSAGE\nno-colon\n\n\0",
                            "MESSAGE\ncontent-length:18446744073709551615\n\nx\0",
                        ] {
                            if socket.send(Message::Text(garbage.to_string())).await.is_err() {
                                return;
                            }
                        }
                    }
                    let destination = frame.get_header("destination").unwrap_or_default();
                    let message = Frame::new(Command::Message)
                        .header("destination", destination)
                        .header("subscription", frame.get_header("id").unwrap_or_default())
                        .header("message-id", "m-1")
                        .with_body(body);
                    if socket.send(Message::Text(message.encode())).await.is_err() {
                        return;
                    }
                }
            }
            Command::Disconnect => return,
            _ => {}
        }
    }
}

async fn start_broker(
    publish: Option<String>,
    mode: Mode,
) -> (String, mpsc::UnboundedReceiver<(usize, Frame)>) {
    let (inbox, frames) = mpsc::unbounded_channel();
    let broker = Broker {
        inbox,
        sessions: Arc::new(AtomicUsize::new(0)),
        publish: Arc::new(Mutex::new(publish)),
        mode,
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(broker);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), frames)
}

fn transport_config(url: &str) -> TransportConfig {
    TransportConfig {
        url: url.to_string(),
        reconnect_delay_ms: 50,
        heartbeat_outgoing_ms: 0,
        heartbeat_incoming_ms: 0,
        ..TransportConfig::default()
    }
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<(usize, Frame)>) -> (usize, Frame) {
    tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("broker frame in time")
        .expect("broker running")
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut states = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *states.borrow_and_update() != wanted {
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("state reached in time");
}

/// Subscriptions made before the socket opens are sent in order after
/// CONNECTED, and messages reach their handlers.
#[tokio::test]
async fn test_queued_subscriptions_realized_after_connect() {
    let (url, mut frames) = start_broker(Some("payload".to_string()), Mode::Normal).await;
    let (manager, outbound) = ConnectionManager::new(false);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _devices = manager.subscribe(DEVICES_TOPIC, move |message| {
        sink.lock().unwrap().push((message.destination.clone(), message.body.clone()));
    });
    let sink = received.clone();
    let _logs = manager.subscribe(LOGS_TOPIC, move |message| {
        sink.lock().unwrap().push((message.destination.clone(), message.body.clone()));
    });
    assert_eq!(manager.pending_count(), 2);

    let cancel = CancellationToken::new();
    let driver = tokio::spawn(run_transport(
        manager.clone(),
        outbound,
        transport_config(&url),
        cancel.clone(),
    ));

    let (_, connect) = next_frame(&mut frames).await;
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.get_header("accept-version"), Some("1.2"));

    let (_, first) = next_frame(&mut frames).await;
    let (_, second) = next_frame(&mut frames).await;
    assert_eq!(first.command, Command::Subscribe);
    assert_eq!(first.get_header("destination"), Some(DEVICES_TOPIC));
    assert_eq!(second.get_header("destination"), Some(LOGS_TOPIC));

    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(manager.active_count(), 2);

    tokio::time::timeout(Duration::from_secs(5), async {
        while received.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let received = received.lock().unwrap().clone();
    assert_eq!(received[0], (DEVICES_TOPIC.to_string(), "payload".to_string()));
    assert_eq!(received[1], (LOGS_TOPIC.to_string(), "payload".to_string()));

    cancel.cancel();
    let (_, disconnect) = next_frame(&mut frames).await;
    assert_eq!(disconnect.command, Command::Disconnect);
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();
}

/// A dropped session reconnects; with resubscribe enabled the active
/// topics are subscribed again on the new session.
#[tokio::test]
async fn test_reconnect_resubscribes_when_enabled() {
    let (url, mut frames) = start_broker(None, Mode::DropFirst).await;
    let (manager, outbound) = ConnectionManager::new(true);
    let _devices = manager.subscribe(DEVICES_TOPIC, |_| {});

    let cancel = CancellationToken::new();
    tokio::spawn(run_transport(
        manager.clone(),
        outbound,
        transport_config(&url),
        cancel.clone(),
    ));

    let mut second_session = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (session, frame) = next_frame(&mut frames).await;
            if session == 1 {
                second_session.push(frame.command);
                if frame.command == Command::Subscribe {
                    assert_eq!(frame.get_header("destination"), Some(DEVICES_TOPIC));
                    break;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(second_session, vec![Command::Connect, Command::Subscribe]);
    wait_for_state(&manager, ConnectionState::Connected).await;
    cancel.cancel();
}

/// A STOMP ERROR frame ends the session; the driver reports the loss and
/// reconnects after the delay.
#[tokio::test]
async fn test_error_frame_ends_session() {
    let (url, mut frames) = start_broker(None, Mode::ErrorOnSubscribe).await;
    let (manager, outbound) = ConnectionManager::new(false);
    let _devices = manager.subscribe(DEVICES_TOPIC, |_| {});

    let mut config = transport_config(&url);
    config.reconnect_delay_ms = 300;
    let cancel = CancellationToken::new();
    tokio::spawn(run_transport(manager.clone(), outbound, config, cancel.clone()));

    let (session, connect) = next_frame(&mut frames).await;
    assert_eq!((session, connect.command), (0, Command::Connect));
    let (session, subscribe) = next_frame(&mut frames).await;
    assert_eq!((session, subscribe.command), (0, Command::Subscribe));

    wait_for_state(&manager, ConnectionState::Disconnected).await;
    assert_eq!(manager.active_count(), 0);

    let (session, reconnect) = next_frame(&mut frames).await;
    assert_eq!((session, reconnect.command), (1, Command::Connect));
    wait_for_state(&manager, ConnectionState::Connected).await;

    cancel.cancel();
}

/// When the broker promises heart-beats and then goes quiet, the watchdog
/// drops the session and the driver opens a new one.
#[tokio::test]
async fn test_heartbeat_silence_triggers_reconnect() {
    let (url, mut frames) = start_broker(None, Mode::SilentFirst).await;
    let (manager, outbound) = ConnectionManager::new(false);

    let mut config = transport_config(&url);
    config.heartbeat_incoming_ms = 100;
    let cancel = CancellationToken::new();
    tokio::spawn(run_transport(manager.clone(), outbound, config, cancel.clone()));

    let (session, connect) = next_frame(&mut frames).await;
    assert_eq!((session, connect.command), (0, Command::Connect));
    assert_eq!(connect.get_header("heart-beat"), Some("0,100"));
    wait_for_state(&manager, ConnectionState::Connected).await;

    let started = tokio::time::Instant::now();
    let (session, reconnect) = next_frame(&mut frames).await;
    assert_eq!((session, reconnect.command), (1, Command::Connect));
    assert!(started.elapsed() >= Duration::from_millis(150));

    wait_for_state(&manager, ConnectionState::Connected).await;
    cancel.cancel();
}

/// Undecodable frames mid-session are dropped; the session stays up and
/// the next valid MESSAGE still reaches its handler.
#[tokio::test]
async fn test_malformed_frames_do_not_end_session() {
    let (url, mut frames) =
        start_broker(Some("after garbage".to_string()), Mode::GarbageBeforeMessage).await;
    let (manager, outbound) = ConnectionManager::new(false);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _logs = manager.subscribe(LOGS_TOPIC, move |message| {
        sink.lock().unwrap().push(message.body.clone());
    });

    let cancel = CancellationToken::new();
    tokio::spawn(run_transport(
        manager.clone(),
        outbound,
        transport_config(&url),
        cancel.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while received.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["after garbage".to_string()]);
    assert!(manager.is_connected());
    assert_eq!(manager.active_count(), 1);

    // Only the first session ever spoke to the broker
    while let Ok((session, _)) = frames.try_recv() {
        assert_eq!(session, 0);
    }

    cancel.cancel();
}

/// Device updates published on the broker land in the store after a flush.
#[tokio::test]
async fn test_dashboard_device_feed_end_to_end() {
    let device = json!({
        "id": "d1",
        "name": "Boiler",
        "type": "VIRTUAL",
        "role": "SENSOR",
        "currentState": "{\"temp\": 21.5}",
        "online": true
    });
    let (url, _frames) = start_broker(Some(device.to_string()), Mode::Normal).await;

    let mut config = LivedashConfig::default();
    config.transport = transport_config(&url);
    config.store.flush_interval_ms = 10;

    let dashboard = Dashboard::new(config).unwrap();
    let _feed = dashboard.mount_device_feed();
    dashboard.start().unwrap();
    assert!(dashboard.start().is_err());

    tokio::time::timeout(Duration::from_secs(5), async {
        while dashboard.store().get("d1").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let stored = dashboard.store().get("d1").unwrap();
    assert_eq!(stored.name, "Boiler");
    assert_eq!(stored.numeric_state().get("temp"), Some(&21.5));
    assert!(dashboard.is_connected());

    dashboard.shutdown().await;
    assert!(!dashboard.is_connected());
}
