//! Live vehicle telemetry over the streaming WebSocket.

pub mod message;
pub mod session;

use std::time::Duration;

use futures::stream::SplitSink;
use futures::StreamExt;
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub use message::{Frame, StreamErrorKind, StreamMessage, Subscription};
pub use session::StreamSession;

use crate::error::Result;

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Opens the streaming socket, subscribes and starts receiving.
pub async fn connect(
    url: &str,
    subscription: &Subscription,
    consumer: mpsc::Sender<Frame>,
    drain_timeout: Duration,
) -> Result<StreamSession<WsSink>> {
    debug!("Connecting to {url}");
    let (socket, _) = connect_async(url).await?;
    let (sink, stream) = socket.split();
    StreamSession::open(sink, stream, subscription, consumer, drain_timeout).await
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves,
/// so the stream keeps running until it ends on its own.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Unable to listen for interrupt: {e}");
        std::future::pending::<()>().await;
    }
}
