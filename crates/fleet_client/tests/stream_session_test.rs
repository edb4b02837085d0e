//! Streaming session against scripted sockets and a local WebSocket server


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::{stream, Sink, SinkExt, Stream, StreamExt};
use fleet_client::stream::Subscription;
use fleet_client::{Error, FleetClient, StreamSession};
use test_utils::{fresh_token, test_config, test_http_client};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

type Inbound = Result<Message, WsError>;

fn text(json: &str) -> Inbound {
    Ok(Message::Text(json.to_string()))
}

fn update(value: &str) -> Inbound {
    text(&format!(
        r#"{{"msg_type":"data:update","tag":"42","value":"{value}"}}"#
    ))
}

/// Write half that records every frame the session sends.
fn recording_sink() -> (
    impl Sink<Message, Error = WsError> + Unpin + Send,
    UnboundedReceiver<Message>,
) {
    let (tx, rx) = unbounded();
    (tx.sink_map_err(|_| WsError::ConnectionClosed), rx)
}

fn subscription() -> Subscription {
    Subscription::new(42, &["speed".to_string(), "soc".to_string()], "live-access")
}

async fn open<St>(
    inbound: St,
    consumer: mpsc::Sender<fleet_client::Frame>,
) -> (
    StreamSession<impl Sink<Message, Error = WsError> + Unpin + Send>,
    UnboundedReceiver<Message>,
)
where
    St: Stream<Item = Inbound> + Unpin + Send + 'static,
{
    let (sink, sent) = recording_sink();
    let session = StreamSession::open(
        sink,
        inbound,
        &subscription(),
        consumer,
        Duration::from_millis(100),
    )
    .await
    .expect("open");
    (session, sent)
}

#[tokio::test]
async fn subscription_is_the_first_frame_sent() {
    let (tx, _rx) = mpsc::channel(1);
    let (_session, mut sent) = open(stream::pending(), tx).await;

    let first = sent.next().await.expect("subscription frame");
    let payload = match first {
        Message::Text(payload) => payload,
        other => panic!("expected a text frame, got {other:?}"),
    };
    let json: serde_json::Value = serde_json::from_str(&payload).expect("json");
    assert_eq!(
        json,
        serde_json::json!({
            "msg_type": "data:subscribe_oauth",
            "token": "live-access",
            "value": "speed,soc",
            "tag": "42"
        })
    );
}

#[tokio::test]
async fn updates_arrive_in_order_then_close_is_a_disconnect() {
    let (tx, mut rx) = mpsc::channel(1);
    let inbound = stream::iter(vec![
        text(r#"{"msg_type":"control:hello","connection_timeout":30000}"#),
        update("1700000000000,10,80"),
        update("1700000000500,12,80"),
        update("1700000001000,14,79"),
        Ok(Message::Close(None)),
    ]);
    let (session, _sent) = open(inbound, tx).await;
    let run = tokio::spawn(session.run(std::future::pending()));

    let mut received = Vec::new();
    while let Some(frame) = rx.recv().await {
        received.push(frame.values()[1].to_string());
    }

    assert_eq!(received, ["10", "12", "14"]);
    let result = run.await.expect("join");
    assert!(matches!(result, Err(Error::StreamDisconnected)));
}

#[tokio::test]
async fn vehicle_disconnected_stops_reading() {
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);
    let inbound = stream::iter(vec![
        text(r#"{"msg_type":"data:error","tag":"42","error_type":"vehicle_disconnected"}"#),
        update("1700000000000,10,80"),
    ])
    .inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (tx, mut rx) = mpsc::channel(4);
    let (session, _sent) = open(inbound, tx).await;
    let result = session.run(std::future::pending()).await;

    assert!(matches!(result, Err(Error::StreamVehicleDisconnected)));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn client_error_is_reported() {
    let (tx, _rx) = mpsc::channel(1);
    let inbound = stream::iter(vec![text(
        r#"{"msg_type":"data:error","tag":"42","error_type":"client_error","value":"Can't validate token"}"#,
    )])
    .chain(stream::pending());
    let (session, _sent) = open(inbound, tx).await;

    let result = session.run(std::future::pending()).await;
    assert!(matches!(result, Err(Error::StreamClientError)));
}

#[tokio::test]
async fn interrupt_sends_normal_close_and_returns_within_bound() {
    let (tx, _rx) = mpsc::channel(1);
    let (session, mut sent) = open(stream::pending(), tx).await;

    let result = tokio::time::timeout(Duration::from_secs(2), session.run(async {}))
        .await
        .expect("run returned within the drain bound");
    assert!(result.is_ok());

    assert!(matches!(sent.next().await, Some(Message::Text(_))));
    assert_eq!(
        sent.next().await,
        Some(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
    );
}

#[tokio::test]
async fn interrupt_returns_when_close_write_stalls() {
    // Accepts the subscription, then never completes another write.
    let stalled = Box::pin(futures::sink::unfold(0usize, |written, _: Message| async move {
        if written > 0 {
            std::future::pending::<()>().await;
        }
        Ok::<_, WsError>(written + 1)
    }));
    let (tx, _rx) = mpsc::channel(1);
    let session = StreamSession::open(
        stalled,
        stream::pending(),
        &subscription(),
        tx,
        Duration::from_millis(100),
    )
    .await
    .expect("open");

    let result = tokio::time::timeout(Duration::from_secs(2), session.run(async {}))
        .await
        .expect("run returned despite the stalled write");
    assert!(result.is_ok());
}

#[tokio::test]
async fn dropping_an_unrun_session_stops_the_reader() {
    let (tx, mut rx) = mpsc::channel(1);
    let (session, _sent) = open(stream::pending(), tx).await;
    drop(session);

    let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("reader released the consumer");
    assert!(closed.is_none());
}

#[tokio::test]
async fn client_streams_from_local_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut socket = tokio_tungstenite::accept_async(tcp).await.expect("handshake");

        let subscribe = socket.next().await.expect("frame").expect("message");
        socket
            .send(Message::Text(
                r#"{"msg_type":"control:hello","connection_timeout":30000}"#.to_string(),
            ))
            .await
            .expect("hello");
        socket
            .send(Message::Text(
                r#"{"msg_type":"data:update","tag":"42","value":"1700000000000,55,81"}"#
                    .to_string(),
            ))
            .await
            .expect("update");
        socket
            .send(Message::Text(
                r#"{"msg_type":"data:error","tag":"42","error_type":"vehicle_disconnected"}"#
                    .to_string(),
            ))
            .await
            .expect("error");
        subscribe
    });

    let mut config = test_config("http://127.0.0.1:9");
    config.streaming.url = format!("ws://{addr}/streaming/");
    let client = FleetClient::builder()
        .with_config(config)
        .with_http_client(test_http_client())
        .with_token(fresh_token())
        .build()
        .await
        .expect("client");

    let (tx, mut rx) = mpsc::channel(4);
    let columns = vec!["speed".to_string(), "soc".to_string()];
    let result = client
        .stream_until(42, &columns, tx, std::future::pending())
        .await;
    assert!(matches!(result, Err(Error::StreamVehicleDisconnected)));

    let frame = rx.recv().await.expect("update");
    assert_eq!(frame.columns(&columns), [("speed", "55"), ("soc", "81")]);

    let subscribe = server.await.expect("server");
    let payload = match subscribe {
        Message::Text(payload) => payload,
        other => panic!("expected a text subscription, got {other:?}"),
    };
    let json: serde_json::Value = serde_json::from_str(&payload).expect("json");
    assert_eq!(json["token"], "live-access");
    assert_eq!(json["tag"], "42");
    assert_eq!(json["value"], "speed,soc");
}
