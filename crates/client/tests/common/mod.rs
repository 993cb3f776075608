//! In-memory broker used by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use hms_client::live::{
    ConnectionState, LiveSubscription, ReconnectConfig, Transport, TransportChannel,
};
use hms_shared::protocol::{Frame, FrameCommand, FrameDecoder, Incoming};
use hms_shared::LiveError;
use serde_json::Value;
use tokio::sync::mpsc;

pub const URL: &str = "ws://hms.test/ws/websocket";
const WAIT: Duration = Duration::from_secs(5);

/// Transport whose connections are handed to the test as [`BrokerSide`]s.
pub struct MockTransport {
    brokers: mpsc::UnboundedSender<BrokerSide>,
    failures: AtomicUsize,
    opens: AtomicUsize,
    stalled: bool,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, Brokers) {
        Self::failing(0)
    }

    /// Transport whose `open` never completes.
    pub fn stalled() -> Arc<Self> {
        let (brokers, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            brokers,
            failures: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            stalled: true,
        })
    }

    /// Refuse the first `failures` connection attempts.
    pub fn failing(failures: usize) -> (Arc<Self>, Brokers) {
        let (brokers, queue) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            brokers,
            failures: AtomicUsize::new(failures),
            opens: AtomicUsize::new(0),
            stalled: false,
        });
        (transport, Brokers(queue))
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<TransportChannel, LiveError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            std::future::pending::<()>().await;
        }
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LiveError::Transport("connection refused".into()));
        }

        let (client_tx, from_client) = unbounded::<String>();
        let (to_client, client_rx) = unbounded::<Result<String, LiveError>>();
        self.brokers
            .send(BrokerSide {
                from_client,
                to_client,
                decoder: FrameDecoder::default(),
                heartbeats: 0,
            })
            .map_err(|_| LiveError::Transport("test finished".into()))?;

        Ok(TransportChannel {
            sink: Box::pin(client_tx.sink_map_err(|e| LiveError::Transport(e.to_string()))),
            stream: client_rx.boxed(),
        })
    }
}

/// Connections opened by the client, in order.
pub struct Brokers(mpsc::UnboundedReceiver<BrokerSide>);

impl Brokers {
    pub async fn next(&mut self) -> BrokerSide {
        tokio::time::timeout(WAIT, self.0.recv())
            .await
            .expect("client did not open a connection")
            .expect("transport dropped")
    }

    pub async fn expect_none(&mut self, wait: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(wait, self.0.recv()).await {
            panic!("unexpected new connection");
        }
    }

    /// Accept every connection from now on in the background.
    pub fn serve_all(mut self) {
        tokio::spawn(async move {
            while let Some(broker) = self.0.recv().await {
                tokio::spawn(broker.serve());
            }
        });
    }
}

/// The broker's end of one connection.
pub struct BrokerSide {
    from_client: UnboundedReceiver<String>,
    to_client: UnboundedSender<Result<String, LiveError>>,
    decoder: FrameDecoder,
    pub heartbeats: usize,
}

impl BrokerSide {
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Frame> {
        loop {
            match self.decoder.next_frame().expect("client sent a malformed frame") {
                Some(Incoming::Frame(frame)) => return Some(frame),
                Some(Incoming::Heartbeat) => {
                    self.heartbeats += 1;
                    continue;
                }
                None => {}
            }
            match tokio::time::timeout(wait, self.from_client.next()).await {
                Ok(Some(text)) => self.decoder.push(&text).expect("frame too large"),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    pub async fn next_frame(&mut self) -> Frame {
        self.try_next_frame(WAIT)
            .await
            .expect("expected a frame from the client")
    }

    pub async fn expect_no_frame(&mut self, wait: Duration) {
        if let Some(frame) = self.try_next_frame(wait).await {
            panic!("unexpected frame: {:?}", frame);
        }
    }

    /// Read the CONNECT frame and answer with CONNECTED.
    pub async fn accept(&mut self) -> Frame {
        self.accept_with_heart_beat("0,0").await
    }

    pub async fn accept_with_heart_beat(&mut self, heart_beat: &str) -> Frame {
        let connect = self.next_frame().await;
        assert_eq!(connect.command, FrameCommand::Connect);
        self.push(
            Frame::new(FrameCommand::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat),
        );
        connect
    }

    /// Read `n` SUBSCRIBE frames.
    pub async fn subscriptions(&mut self, n: usize) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            let frame = self.next_frame().await;
            assert_eq!(frame.command, FrameCommand::Subscribe);
            frames.push(frame);
        }
        frames
    }

    pub fn push(&self, frame: Frame) {
        self.push_raw(&frame.encode());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }

    /// Answer the handshake, then read until the client goes away.
    pub async fn serve(mut self) {
        if let Some(connect) = self.try_next_frame(WAIT).await {
            if connect.command == FrameCommand::Connect {
                self.push(
                    Frame::new(FrameCommand::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0"),
                );
            }
        }
        while self.from_client.next().await.is_some() {}
    }

    pub fn message(&self, subscription: Option<&str>, destination: &str, body: &str) {
        let mut frame = Frame::new(FrameCommand::Message)
            .header("destination", destination)
            .header("message-id", "m-1");
        if let Some(id) = subscription {
            frame = frame.header("subscription", id);
        }
        self.push(frame.body(body));
    }

    pub fn reject(&self, message: &str) {
        self.push(Frame::new(FrameCommand::Error).header("message", message));
    }

    /// Drop the connection from the broker's side.
    pub fn hang_up(self) {
        drop(self);
    }

    /// Wait for the client to close its end, counting heart-beats on the way.
    pub async fn wait_closed(&mut self) {
        tokio::time::timeout(WAIT, async {
            while let Some(text) = self.from_client.next().await {
                self.decoder.push(&text).expect("frame too large");
                while let Some(incoming) = self.decoder.next_frame().expect("malformed frame") {
                    if incoming == Incoming::Heartbeat {
                        self.heartbeats += 1;
                    }
                }
            }
        })
        .await
        .expect("client did not close the connection");
    }
}

/// Id of the subscription for `destination` among `frames`.
pub fn subscription_id<'a>(frames: &'a [Frame], destination: &str) -> &'a str {
    frames
        .iter()
        .find(|f| f.get("destination") == Some(destination))
        .and_then(|f| f.get("id"))
        .expect("no subscription for destination")
}

/// Handler that records every payload it receives.
pub fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |value| sink.lock().unwrap().push(value))
}

pub fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        enabled: true,
        max_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
        jitter: 0.0,
    }
}

pub async fn wait_for_state(
    subscription: &LiveSubscription,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut states = subscription.watch_state();
    let state = tokio::time::timeout(WAIT, states.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("connection dropped");
    let state = (*state).clone();
    state
}

pub async fn wait_connected(subscription: &LiveSubscription) {
    wait_for_state(subscription, ConnectionState::is_connected).await;
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
