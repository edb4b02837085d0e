use std::future::Future;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::message::{Frame, StreamErrorKind, StreamMessage, Subscription};
use crate::error::{Error, Result};

/// Why the receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    Disconnected,
    ClientError,
    VehicleDisconnected,
    ConsumerGone,
}

impl StreamEnd {
    fn into_result(self) -> Result<()> {
        match self {
            StreamEnd::Disconnected => Err(Error::StreamDisconnected),
            StreamEnd::ClientError => Err(Error::StreamClientError),
            StreamEnd::VehicleDisconnected => Err(Error::StreamVehicleDisconnected),
            StreamEnd::ConsumerGone => Ok(()),
        }
    }
}

/// One subscribed telemetry stream for a single vehicle.
///
/// Reading happens on a spawned task that owns the read half of the socket.
/// It hands data updates to the consumer channel and reports how it ended
/// through a oneshot; the session itself keeps only the write half.
pub struct StreamSession<Si> {
    sink: Si,
    done: oneshot::Receiver<StreamEnd>,
    reader: JoinHandle<()>,
    drain_timeout: Duration,
}

impl<Si> StreamSession<Si>
where
    Si: Sink<Message, Error = WsError> + Unpin + Send,
{
    /// Sends the subscription frame and starts the receive loop.
    pub async fn open<St>(
        mut sink: Si,
        stream: St,
        subscription: &Subscription,
        consumer: mpsc::Sender<Frame>,
        drain_timeout: Duration,
    ) -> Result<Self>
    where
        St: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send + 'static,
    {
        let payload = serde_json::to_string(subscription)?;
        info!(
            "Subscribing to vehicle {} columns [{}]",
            subscription.tag, subscription.value
        );
        sink.send(Message::Text(payload)).await?;

        let (done_tx, done) = oneshot::channel();
        let reader = tokio::spawn(async move {
            let end = receive_loop(stream, consumer).await;
            let _ = done_tx.send(end);
        });

        Ok(StreamSession {
            sink,
            done,
            reader,
            drain_timeout,
        })
    }

    /// Waits for the stream to end or for `interrupt` to fire.
    ///
    /// A terminal stream failure is returned as its error. On interrupt a
    /// normal-closure frame is sent and the reader is given `drain_timeout`,
    /// counted from the interrupt, to finish. The result is `Ok(())` whether
    /// or not it did.
    pub async fn run<F>(mut self, interrupt: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        tokio::select! {
            end = &mut self.done => {
                end.unwrap_or(StreamEnd::Disconnected).into_result()
            }
            _ = &mut interrupt => {
                info!("Interrupted, closing stream");
                let drain_timeout = self.drain_timeout;
                // The close write and the drain share one deadline.
                let close = async {
                    let frame = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    }));
                    if let Err(e) = self.sink.send(frame).await {
                        warn!("Failed to send close frame: {e}");
                        return;
                    }
                    let _ = (&mut self.done).await;
                };
                if tokio::time::timeout(drain_timeout, close).await.is_err() {
                    debug!("Stream did not close within {drain_timeout:?}");
                }
                self.reader.abort();
                Ok(())
            }
        }
    }
}

impl<Si> Drop for StreamSession<Si> {
    fn drop(&mut self) {
        // Stops the reader if `run` was never called.
        self.reader.abort();
    }
}

async fn receive_loop<St>(mut stream: St, consumer: mpsc::Sender<Frame>) -> StreamEnd
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(next) = stream.next().await {
        let payload = match next {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                info!("Stream closed by peer: {frame:?}");
                return StreamEnd::Disconnected;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("Stream read error: {e}");
                return StreamEnd::Disconnected;
            }
        };
        debug!("Stream received message: {}", String::from_utf8_lossy(&payload));

        let frame: Frame = match serde_json::from_slice(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "Unable to decode stream message ({}): {e}",
                    String::from_utf8_lossy(&payload)
                );
                continue;
            }
        };

        match frame.classify() {
            StreamMessage::Hello { connection_timeout } => {
                debug!("Stream hello, connection timeout {connection_timeout}ms");
            }
            StreamMessage::DataUpdate(frame) => {
                if consumer.send(frame).await.is_err() {
                    info!("Stream consumer dropped, stopping");
                    return StreamEnd::ConsumerGone;
                }
            }
            StreamMessage::DataError(kind) => {
                warn!("Stream error: {kind:?}");
                return match kind {
                    StreamErrorKind::ClientError => StreamEnd::ClientError,
                    StreamErrorKind::VehicleDisconnected => StreamEnd::VehicleDisconnected,
                    StreamErrorKind::Other(_) => StreamEnd::Disconnected,
                };
            }
            StreamMessage::Unrecognized(kind) => {
                debug!("Received unhandled message type: {kind}");
            }
        }
    }
    info!("Stream ended");
    StreamEnd::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn text(json: &str) -> std::result::Result<Message, WsError> {
        Ok(Message::Text(json.to_string()))
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_skipped() {
        let (tx, mut rx) = mpsc::channel(8);
        let frames = stream::iter(vec![
            text("not json"),
            Ok(Message::Ping(vec![1])),
            text(r#"{"msg_type":"control:later"}"#),
            text(r#"{"msg_type":"data:update","tag":"1","value":"1,2,3"}"#),
        ]);

        let end = receive_loop(frames, tx).await;

        assert_eq!(end, StreamEnd::Disconnected);
        assert_eq!(rx.recv().await.map(|f| f.value), Some("1,2,3".to_string()));
    }

    #[tokio::test]
    async fn client_error_is_terminal() {
        let (tx, _rx) = mpsc::channel(1);
        let frames = stream::iter(vec![text(
            r#"{"msg_type":"data:error","error_type":"client_error","value":"bad token"}"#,
        )]);
        assert_eq!(receive_loop(frames, tx).await, StreamEnd::ClientError);
    }

    #[tokio::test]
    async fn unknown_error_subtype_is_a_disconnect() {
        let (tx, _rx) = mpsc::channel(1);
        let frames = stream::iter(vec![text(
            r#"{"msg_type":"data:error","error_type":"server_busy"}"#,
        )]);
        assert_eq!(receive_loop(frames, tx).await, StreamEnd::Disconnected);
    }

    #[tokio::test]
    async fn read_error_is_a_disconnect() {
        let (tx, _rx) = mpsc::channel(1);
        let frames = stream::iter(vec![Err(WsError::ConnectionClosed)]);
        assert_eq!(receive_loop(frames, tx).await, StreamEnd::Disconnected);
    }

    #[tokio::test]
    async fn dropped_consumer_ends_cleanly() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let frames = stream::iter(vec![text(r#"{"msg_type":"data:update","value":"1"}"#)]);
        let end = receive_loop(frames, tx).await;
        assert_eq!(end, StreamEnd::ConsumerGone);
        assert!(end.into_result().is_ok());
    }
}
