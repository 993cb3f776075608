//! Bus connection with state management and auto-reconnect.
//!
//! A [`Connection`] is a cheap, cloneable handle. The socket, the decoder and
//! the subscription registry all live in a driver task spawned by
//! [`Connection::open`]; handles talk to it over a command channel and observe
//! it through a `watch` channel. The task stops when the last handle is dropped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hms_shared::protocol::{
    self, Frame, FrameCommand, FrameDecoder, HeartBeat, Incoming, NegotiatedHeartBeat,
    HEADER_DESTINATION, HEADER_HEART_BEAT, HEADER_RECEIPT_ID, HEADER_SUBSCRIPTION,
};
use hms_shared::LiveError;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::subscription::{Handler, LiveSubscription, TopicMap};
use super::transport::{Transport, TransportChannel};

/// Silence tolerated from the broker, as a multiple of the negotiated interval.
const HEARTBEAT_GRACE: u32 = 2;

/// Connection state for a bus connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Reconnect automatically after a failure. When false the caller has to
    /// call `reconnect()` itself.
    pub enabled: bool,
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Fraction of each delay that is randomized, 0.0 to 1.0
    pub jitter: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Never reconnect on its own.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let delay =
            self.initial_delay_ms as f64 * (self.backoff_multiplier as f64).powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }

    /// Calculate delay for a given attempt number, jitter applied.
    ///
    /// The result lies in `[base * (1 - jitter), base]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0) as f64;
        let spread = (base as f64 * jitter) as u64;
        if spread == 0 {
            return Duration::from_millis(base);
        }
        let offset = rand::thread_rng().gen_range(0..=spread);
        Duration::from_millis(base - offset)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Options for opening a bus connection.
#[derive(Debug, Clone)]
pub struct LiveOptions {
    /// Extra headers sent with the STOMP CONNECT frame
    pub connect_headers: Vec<(String, String)>,
    pub heart_beat: HeartBeat,
    pub reconnect: ReconnectConfig,
    pub handshake_timeout: Duration,
    /// Value of the STOMP `host` header. Defaults to the URL's host.
    pub virtual_host: Option<String>,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            connect_headers: Vec::new(),
            heart_beat: HeartBeat::default(),
            reconnect: ReconnectConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            virtual_host: None,
        }
    }
}

impl LiveOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_headers.push((name.into(), value.into()));
        self
    }

    /// Authenticate the CONNECT frame with a bearer token.
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token.as_ref()))
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }
}

/// State shared between handles and the driver task.
struct Shared {
    state: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<String>>,
    /// Cleared by an explicit disconnect. No handler runs while false.
    open: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            last_error: Mutex::new(None),
            open: AtomicBool::new(true),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn record_error(&self, err: &LiveError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

enum Command {
    Subscribe {
        id: String,
        destination: String,
        handler: Handler,
        active: Arc<AtomicBool>,
    },
    Unsubscribe {
        id: String,
    },
    Send {
        destination: String,
        body: String,
        headers: Vec<(String, String)>,
    },
    Disconnect,
    Reconnect,
    /// Acknowledged once every earlier command has been handled.
    Flush(oneshot::Sender<()>),
}

struct Inner {
    endpoint: String,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    /// Attached subscribers. Held while the last one leaves or the first one
    /// arrives, so a close and a reopen cannot interleave.
    leases: Mutex<usize>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The driver exits once it sees the command channel close.
        self.shared.open.store(false, Ordering::SeqCst);
    }
}

/// Handle to one bus connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub(crate) struct WeakConnection(Weak<Inner>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Connection {
    /// Open a connection to `endpoint` and start its driver task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        options: LiveOptions,
    ) -> Self {
        let endpoint = endpoint.into();
        let shared = Arc::new(Shared::new());
        let (sender, receiver) = mpsc::unbounded_channel();

        let driver = Driver {
            endpoint: endpoint.clone(),
            transport,
            options,
            shared: shared.clone(),
            commands: receiver,
            pending: VecDeque::new(),
            registry: BTreeMap::new(),
        };
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Inner {
                endpoint,
                shared,
                commands: sender,
                next_id: AtomicU64::new(0),
                leases: Mutex::new(0),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.is_open() && self.state().is_connected()
    }

    /// Description of the most recent failure, cleared on a successful connect.
    pub fn last_error(&self) -> Option<String> {
        self.inner.shared.last_error()
    }

    /// Number of live subscriptions attached to this connection.
    pub fn subscriber_count(&self) -> usize {
        *self.leases()
    }

    /// Attach a topic map to this connection.
    pub fn subscribe(&self, topics: TopicMap) -> LiveSubscription {
        LiveSubscription::attach(self.clone(), topics)
    }

    /// Publish `body` as JSON to `destination`.
    ///
    /// Fire-and-forget: returns `false` without touching the network when the
    /// connection is not established, and nothing is queued for later.
    pub fn send_message<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> bool {
        if !self.is_connected() {
            crate::log_warn!(
                "Not connected to {}, dropping message for {}",
                self.inner.endpoint,
                destination
            );
            return false;
        }
        let json = match serde_json::to_string(body) {
            Ok(json) => json,
            Err(e) => {
                crate::log_error!("Serialize failed for {}: {}", destination, e);
                return false;
            }
        };
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner
            .commands
            .send(Command::Send {
                destination: destination.to_string(),
                body: json,
                headers,
            })
            .is_ok()
    }

    /// Close the connection for every subscriber. Idempotent.
    pub fn disconnect(&self) {
        if self.inner.shared.open.swap(false, Ordering::SeqCst) {
            self.inner.shared.set_state(ConnectionState::Disconnected);
            let _ = self.inner.commands.send(Command::Disconnect);
        }
    }

    /// Wait until the driver has handled every command issued before this
    /// call, including writing any frames they produce.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.inner.commands.send(Command::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }

    /// Connect again with the original parameters, resetting the attempt count.
    pub fn reconnect(&self) {
        self.inner.shared.open.store(true, Ordering::SeqCst);
        let _ = self.inner.commands.send(Command::Reconnect);
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }

    pub(crate) fn register(
        &self,
        destination: &str,
        handler: Handler,
        active: Arc<AtomicBool>,
    ) -> String {
        let id = format!("sub-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let _ = self.inner.commands.send(Command::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
            handler,
            active,
        });
        id
    }

    pub(crate) fn unregister(&self, id: String) {
        let _ = self.inner.commands.send(Command::Unsubscribe { id });
    }

    fn leases(&self) -> MutexGuard<'_, usize> {
        self.inner.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn retain(&self) {
        let mut leases = self.leases();
        *leases += 1;
        if *leases == 1 && !self.inner.shared.is_open() {
            self.reconnect();
        }
    }

    pub(crate) fn release(&self) {
        let mut leases = self.leases();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            self.disconnect();
        }
    }
}

struct Registered {
    destination: String,
    handler: Handler,
    active: Arc<AtomicBool>,
}

impl Registered {
    fn deliver(&self, payload: Value) {
        if self.active.load(Ordering::SeqCst) {
            (self.handler)(payload);
        }
    }
}

struct Session {
    channel: TransportChannel,
    decoder: FrameDecoder,
    heart_beat: NegotiatedHeartBeat,
    last_sent: Instant,
    last_received: Instant,
}

impl Session {
    async fn send(&mut self, frame: Frame) -> Result<(), LiveError> {
        self.channel.sink.send(frame.encode()).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    async fn close(&mut self) {
        let receipt = format!("disconnect-{}", uuid::Uuid::new_v4());
        let _ = self.send(protocol::disconnect_frame(&receipt)).await;
        let _ = self.channel.sink.close().await;
    }

    fn ticker(&self) -> Option<Interval> {
        let period = match (self.heart_beat.send_every, self.heart_beat.expect_within) {
            (Some(send), Some(expect)) => send.min(expect),
            (Some(send), None) => send,
            (None, Some(expect)) => expect,
            (None, None) => return None,
        };
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(interval)
    }

    async fn on_tick(&mut self) -> Result<(), LiveError> {
        let now = Instant::now();
        if let Some(expect) = self.heart_beat.expect_within {
            let limit = expect * HEARTBEAT_GRACE;
            if now.duration_since(self.last_received) > limit {
                return Err(LiveError::HeartbeatTimeout(limit));
            }
        }
        if let Some(every) = self.heart_beat.send_every {
            if now.duration_since(self.last_sent) >= every {
                self.channel.sink.send("\n".to_string()).await?;
                self.last_sent = now;
            }
        }
        Ok(())
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Open the transport and complete the STOMP handshake, both within the
/// handshake timeout.
async fn establish(
    transport: Arc<dyn Transport>,
    endpoint: String,
    options: LiveOptions,
) -> Result<Session, LiveError> {
    let timeout = options.handshake_timeout;
    tokio::time::timeout(timeout, open_session(transport, endpoint, options))
        .await
        .map_err(|_| LiveError::HandshakeTimeout(timeout))?
}

async fn open_session(
    transport: Arc<dyn Transport>,
    endpoint: String,
    options: LiveOptions,
) -> Result<Session, LiveError> {
    let mut channel = transport.open(&endpoint).await?;

    let host = options
        .virtual_host
        .clone()
        .or_else(|| {
            url::Url::parse(&endpoint)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| "/".to_string());
    let connect = protocol::connect_frame(&host, options.heart_beat, &options.connect_headers);
    channel.sink.send(connect.encode()).await?;

    let mut decoder = FrameDecoder::default();
    let connected = await_connected(&mut channel, &mut decoder).await?;

    let server = connected
        .get(HEADER_HEART_BEAT)
        .map(HeartBeat::parse)
        .transpose()?
        .unwrap_or(HeartBeat::DISABLED);

    let now = Instant::now();
    Ok(Session {
        channel,
        decoder,
        heart_beat: HeartBeat::negotiate(options.heart_beat, server),
        last_sent: now,
        last_received: now,
    })
}

async fn await_connected(
    channel: &mut TransportChannel,
    decoder: &mut FrameDecoder,
) -> Result<Frame, LiveError> {
    loop {
        while let Some(incoming) = decoder.next_frame()? {
            let Incoming::Frame(frame) = incoming else {
                continue;
            };
            return match frame.command {
                FrameCommand::Connected => Ok(frame),
                FrameCommand::Error => Err(LiveError::Broker(protocol::error_summary(&frame))),
                other => Err(LiveError::Handshake(other.to_string())),
            };
        }
        match channel.stream.next().await {
            Some(Ok(text)) => decoder.push(&text)?,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(LiveError::Closed(
                    "connection closed during handshake".to_string(),
                ))
            }
        }
    }
}

fn decode_payload(body: &str) -> Result<Value, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
}

enum Next {
    Connect { attempt: u32 },
    Idle,
    Exit,
}

enum Handshake {
    Ready(Session),
    Cancelled,
    Closed,
    Failed(LiveError),
}

/// Background task owning the socket of one connection.
struct Driver {
    endpoint: String,
    transport: Arc<dyn Transport>,
    options: LiveOptions,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Commands taken off the channel early, handled before new ones.
    pending: VecDeque<Command>,
    registry: BTreeMap<String, Registered>,
}

impl Driver {
    async fn run(mut self) {
        let mut next = Next::Connect { attempt: 0 };
        loop {
            next = match next {
                Next::Connect { attempt } => self.connect(attempt).await,
                Next::Idle => self.idle().await,
                Next::Exit => break,
            };
        }
        self.shared.set_state(ConnectionState::Disconnected);
        crate::log_debug!("Connection driver for {} stopped", self.endpoint);
    }

    async fn next_command(&mut self) -> Option<Command> {
        if let Some(command) = self.pending.pop_front() {
            return Some(command);
        }
        self.commands.recv().await
    }

    async fn connect(&mut self, attempt: u32) -> Next {
        self.shared.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        });

        match self.handshake().await {
            Handshake::Ready(session) => {
                crate::log_info!("Bus connected to {}", self.endpoint);
                self.run_session(session).await
            }
            Handshake::Cancelled => Next::Idle,
            Handshake::Closed => Next::Exit,
            Handshake::Failed(err) => {
                crate::log_error!("Bus connection to {} failed: {}", self.endpoint, err);
                self.after_failure(err, attempt).await
            }
        }
    }

    async fn handshake(&mut self) -> Handshake {
        let establishing = establish(
            self.transport.clone(),
            self.endpoint.clone(),
            self.options.clone(),
        );
        tokio::pin!(establishing);

        loop {
            tokio::select! {
                result = &mut establishing => {
                    return match result {
                        Ok(session) => Handshake::Ready(session),
                        Err(err) => Handshake::Failed(err),
                    };
                }
                command = self.next_command() => match command {
                    None => return Handshake::Closed,
                    Some(Command::Disconnect) => {
                        self.shared.set_state(ConnectionState::Disconnected);
                        return Handshake::Cancelled;
                    }
                    Some(other) => self.apply_offline(other),
                }
            }
        }
    }

    /// Handle a command while no session exists.
    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Subscribe {
                id,
                destination,
                handler,
                active,
            } => {
                self.registry.insert(
                    id,
                    Registered {
                        destination,
                        handler,
                        active,
                    },
                );
            }
            Command::Unsubscribe { id } => {
                self.registry.remove(&id);
            }
            Command::Send { destination, .. } => {
                crate::log_warn!(
                    "Not connected to {}, dropping message for {}",
                    self.endpoint,
                    destination
                );
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Disconnect | Command::Reconnect => {}
        }
    }

    async fn run_session(&mut self, mut session: Session) -> Next {
        match self.serve(&mut session).await {
            Ok(next) => next,
            Err(err) => {
                drop(session);
                crate::log_error!("Bus connection to {} lost: {}", self.endpoint, err);
                self.after_failure(err, 0).await
            }
        }
    }

    async fn serve(&mut self, session: &mut Session) -> Result<Next, LiveError> {
        // Registrations queued during the handshake go out with the initial
        // subscriptions; anything else waits until we are connected.
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Subscribe { .. } | Command::Unsubscribe { .. } => {
                    self.apply_offline(command)
                }
                other => self.pending.push_back(other),
            }
        }

        let subscriptions: Vec<Frame> = self
            .registry
            .iter()
            .map(|(id, entry)| protocol::subscribe_frame(id, &entry.destination))
            .collect();
        for frame in subscriptions {
            session.send(frame).await?;
        }

        self.shared.clear_error();
        if self.shared.is_open() {
            self.shared.set_state(ConnectionState::Connected);
        }

        let mut ticker = session.ticker();
        loop {
            tokio::select! {
                inbound = session.channel.stream.next() => match inbound {
                    Some(Ok(text)) => {
                        session.last_received = Instant::now();
                        self.on_inbound(session, &text)?;
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Err(LiveError::Closed("stream ended".to_string())),
                },
                command = self.next_command() => {
                    if let Some(next) = self.on_command(command, session).await? {
                        return Ok(next);
                    }
                }
                _ = tick(&mut ticker) => session.on_tick().await?,
            }
        }
    }

    async fn on_command(
        &mut self,
        command: Option<Command>,
        session: &mut Session,
    ) -> Result<Option<Next>, LiveError> {
        match command {
            None => {
                session.close().await;
                Ok(Some(Next::Exit))
            }
            Some(Command::Disconnect) => {
                session.close().await;
                self.shared.set_state(ConnectionState::Disconnected);
                crate::log_info!("Bus connection to {} closed", self.endpoint);
                Ok(Some(Next::Idle))
            }
            Some(Command::Reconnect) => Ok(None),
            Some(Command::Flush(done)) => {
                let _ = done.send(());
                Ok(None)
            }
            Some(Command::Subscribe {
                id,
                destination,
                handler,
                active,
            }) => {
                let frame = protocol::subscribe_frame(&id, &destination);
                self.registry.insert(
                    id,
                    Registered {
                        destination,
                        handler,
                        active,
                    },
                );
                session.send(frame).await?;
                Ok(None)
            }
            Some(Command::Unsubscribe { id }) => {
                if self.registry.remove(&id).is_some() {
                    session.send(protocol::unsubscribe_frame(&id)).await?;
                }
                Ok(None)
            }
            Some(Command::Send {
                destination,
                body,
                headers,
            }) => {
                crate::log_debug!("Sending to {}: {}", destination, body);
                session
                    .send(protocol::send_frame(&destination, body, &headers))
                    .await?;
                Ok(None)
            }
        }
    }

    fn on_inbound(&self, session: &mut Session, text: &str) -> Result<(), LiveError> {
        session.decoder.push(text)?;
        while let Some(incoming) = session.decoder.next_frame()? {
            let Incoming::Frame(frame) = incoming else {
                continue;
            };
            match frame.command {
                FrameCommand::Message => self.dispatch(&frame),
                FrameCommand::Error => {
                    return Err(LiveError::Broker(protocol::error_summary(&frame)));
                }
                FrameCommand::Receipt => {
                    crate::log_debug!(
                        "Receipt {} from {}",
                        frame.get(HEADER_RECEIPT_ID).unwrap_or("?"),
                        self.endpoint
                    );
                }
                other => {
                    crate::log_debug!("Ignoring {} frame from {}", other, self.endpoint);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, frame: &Frame) {
        if !self.shared.is_open() {
            return;
        }
        let destination = frame.get(HEADER_DESTINATION).unwrap_or_default();
        let payload = match decode_payload(&frame.body) {
            Ok(payload) => payload,
            Err(e) => {
                crate::log_error!("Dropping message on {}: invalid JSON: {}", destination, e);
                return;
            }
        };

        match frame.get(HEADER_SUBSCRIPTION) {
            Some(id) => match self.registry.get(id) {
                Some(entry) => entry.deliver(payload),
                None => crate::log_debug!("Message for unknown subscription {}", id),
            },
            None => {
                for entry in self
                    .registry
                    .values()
                    .filter(|entry| entry.destination == destination)
                {
                    entry.deliver(payload.clone());
                }
            }
        }
    }

    async fn after_failure(&mut self, err: LiveError, attempt: u32) -> Next {
        self.shared.record_error(&err);
        self.shared.set_state(ConnectionState::Disconnected);

        let policy = self.options.reconnect.clone();
        if !policy.enabled {
            crate::log_info!(
                "Automatic reconnect disabled for {}, waiting for reconnect()",
                self.endpoint
            );
            return Next::Idle;
        }
        if policy.exhausted(attempt) {
            self.shared.set_state(ConnectionState::Failed {
                reason: format!(
                    "Max reconnect attempts ({}) exceeded: {}",
                    policy.max_attempts, err
                ),
            });
            return Next::Idle;
        }

        let delay = policy.delay_for_attempt(attempt);
        crate::log_info!(
            "Reconnecting to {} in {}ms (attempt {})",
            self.endpoint,
            delay.as_millis(),
            attempt + 1
        );
        self.backoff(delay, attempt + 1).await
    }

    async fn backoff(&mut self, delay: Duration, next_attempt: u32) -> Next {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Next::Connect { attempt: next_attempt },
                command = self.next_command() => match command {
                    None => return Next::Exit,
                    Some(Command::Disconnect) => {
                        self.shared.set_state(ConnectionState::Disconnected);
                        return Next::Idle;
                    }
                    Some(Command::Reconnect) => return Next::Connect { attempt: 0 },
                    Some(other) => self.apply_offline(other),
                }
            }
        }
    }

    async fn idle(&mut self) -> Next {
        loop {
            match self.next_command().await {
                None => return Next::Exit,
                Some(Command::Reconnect) => return Next::Connect { attempt: 0 },
                Some(Command::Disconnect) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                Some(other) => self.apply_offline(other),
            }
        }
    }
}
