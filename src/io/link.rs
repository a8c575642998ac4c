//! Link supervisor - keeps one WebSocket link to a reader/scanner process alive
//!
//! Lifecycle: open, detect-ready, keepalive, detect-failure, reattach after a
//! fixed delay. Loss is retried indefinitely; a deliberate close is not.
//!
//! Timer roles per link: liveness (catches opens that never become ready),
//! reattach (fixed-delay retry), keepalive (ping chain). At most one timer
//! per role is pending at any instant; every arm point cancels the existing
//! handle of that role first.

use crate::domain::Message;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Link readiness, mirrored from the supervisor task for synchronous reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Closed,
    Connecting,
    Open,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Closed => "closed",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Open => "open",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Send attempted while the link is not open; the frame is lost by
    /// contract, callers decide whether that matters
    #[error("link {0} is not connected")]
    NotConnected(String),
    /// Supervisor task is gone (shutdown)
    #[error("link {0} supervisor unavailable")]
    Unavailable(String),
}

/// Per-link connection settings
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub endpoint: String,
    /// How long an open attempt may stay not-ready before the liveness
    /// check treats it as silently failed
    pub check_connected_wait: Duration,
    /// Fixed delay before reattaching after loss
    pub reopen_socket_wait: Duration,
    /// Keepalive ping interval
    pub ping_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8081".to_string(),
            check_connected_wait: Duration::from_millis(3000),
            reopen_socket_wait: Duration::from_millis(5000),
            ping_interval: Duration::from_millis(30_000),
        }
    }
}

/// Caller-supplied callbacks, invoked from the supervisor task.
///
/// Callbacks of one link never overlap each other; callbacks of different
/// links interleave freely.
pub struct LinkCallbacks {
    on_open: Box<dyn Fn() + Send + Sync>,
    on_close: Box<dyn Fn() + Send + Sync>,
    on_message: Box<dyn Fn(Message) + Send + Sync>,
}

impl Default for LinkCallbacks {
    fn default() -> Self {
        Self {
            on_open: Box::new(|| {}),
            on_close: Box::new(|| {}),
            on_message: Box::new(|_| {}),
        }
    }
}

impl LinkCallbacks {
    pub fn with_on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Box::new(f);
        self
    }

    pub fn with_on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Box::new(f);
        self
    }

    pub fn with_on_message(mut self, f: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.on_message = Box::new(f);
        self
    }
}

enum LinkCommand {
    Open,
    Close,
    Send(Message),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerRole {
    Liveness,
    Reattach,
    Keepalive,
}

impl TimerRole {
    fn as_str(&self) -> &'static str {
        match self {
            TimerRole::Liveness => "liveness",
            TimerRole::Reattach => "reattach",
            TimerRole::Keepalive => "keepalive",
        }
    }
}

enum LinkEvent {
    Timer(TimerRole),
    Dialed(Box<Result<WsStream, WsError>>),
}

/// Cancellable one-shot timers, one slot per role.
///
/// Arming a role aborts whatever was pending in that slot first, so at most
/// one timer per role can ever fire.
struct TimerSlots {
    liveness: Option<JoinHandle<()>>,
    reattach: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    fire_tx: mpsc::Sender<LinkEvent>,
}

impl TimerSlots {
    fn new(fire_tx: mpsc::Sender<LinkEvent>) -> Self {
        Self { liveness: None, reattach: None, keepalive: None, fire_tx }
    }

    fn slot_mut(&mut self, role: TimerRole) -> &mut Option<JoinHandle<()>> {
        match role {
            TimerRole::Liveness => &mut self.liveness,
            TimerRole::Reattach => &mut self.reattach,
            TimerRole::Keepalive => &mut self.keepalive,
        }
    }

    fn arm(&mut self, role: TimerRole, after: Duration) {
        self.cancel(role);
        let tx = self.fire_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(LinkEvent::Timer(role)).await;
        });
        *self.slot_mut(role) = Some(handle);
    }

    fn cancel(&mut self, role: TimerRole) {
        if let Some(handle) = self.slot_mut(role).take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel(TimerRole::Liveness);
        self.cancel(TimerRole::Reattach);
        self.cancel(TimerRole::Keepalive);
    }
}

/// Handle to one supervised link.
///
/// The socket and all timers live in the supervisor task; nothing of the
/// connection state is reachable from outside.
pub struct LinkSupervisor {
    name: String,
    status: Arc<RwLock<LinkStatus>>,
    cmd_tx: mpsc::Sender<LinkCommand>,
}

impl LinkSupervisor {
    /// Spawn the supervisor task for one named link
    pub fn spawn(
        name: impl Into<String>,
        config: LinkConfig,
        callbacks: LinkCallbacks,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let name = name.into();
        let status = Arc::new(RwLock::new(LinkStatus::Closed));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(8);

        let task = LinkTask {
            name: name.clone(),
            config,
            callbacks,
            status: status.clone(),
            cmd_rx,
            event_tx: event_tx.clone(),
            event_rx,
            timers: TimerSlots::new(event_tx),
            socket: None,
            want_open: false,
        };
        tokio::spawn(task.run(shutdown));

        Self { name, status, cmd_tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    pub fn is_open(&self) -> bool {
        self.status() == LinkStatus::Open
    }

    /// Request an open attempt; no-op if already connecting or open
    pub async fn open(&self) -> Result<(), LinkError> {
        self.cmd_tx
            .send(LinkCommand::Open)
            .await
            .map_err(|_| LinkError::Unavailable(self.name.clone()))
    }

    /// Deliberately close the link; cancels every pending timer and does
    /// not reattach
    pub async fn close(&self) -> Result<(), LinkError> {
        self.cmd_tx
            .send(LinkCommand::Close)
            .await
            .map_err(|_| LinkError::Unavailable(self.name.clone()))
    }

    /// Transmit one frame if the link is open.
    ///
    /// Frames are never queued for later delivery; a `NotConnected` failure
    /// means the frame is lost and the caller decides whether to care.
    pub fn send(&self, msg: Message) -> Result<(), LinkError> {
        if self.status() != LinkStatus::Open {
            return Err(LinkError::NotConnected(self.name.clone()));
        }
        self.cmd_tx
            .try_send(LinkCommand::Send(msg))
            .map_err(|_| LinkError::Unavailable(self.name.clone()))
    }
}

struct LinkTask {
    name: String,
    config: LinkConfig,
    callbacks: LinkCallbacks,
    status: Arc<RwLock<LinkStatus>>,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: mpsc::Sender<LinkEvent>,
    event_rx: mpsc::Receiver<LinkEvent>,
    timers: TimerSlots,
    socket: Option<WsStream>,
    /// False once the caller deliberately closed; gates every reattach
    want_open: bool,
}

enum Step {
    Cmd(LinkCommand),
    Event(LinkEvent),
    Frame(Option<Result<WsMessage, WsError>>),
    Shutdown,
}

impl LinkTask {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(name = %self.name, endpoint = %self.config.endpoint, "link_supervisor_started");

        loop {
            let step = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { Step::Shutdown } else { continue; }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => Step::Cmd(cmd),
                    None => Step::Shutdown,
                },
                event = self.event_rx.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Shutdown,
                },
                frame = Self::next_frame(self.socket.as_mut()), if self.socket.is_some() => {
                    Step::Frame(frame)
                }
            };

            match step {
                Step::Cmd(LinkCommand::Open) => self.begin_open(),
                Step::Cmd(LinkCommand::Close) => self.deliberate_close().await,
                Step::Cmd(LinkCommand::Send(msg)) => {
                    let _ = self.transmit(msg).await;
                }
                Step::Event(LinkEvent::Timer(TimerRole::Liveness)) => self.liveness_check(),
                Step::Event(LinkEvent::Timer(TimerRole::Reattach)) => self.begin_open(),
                Step::Event(LinkEvent::Timer(TimerRole::Keepalive)) => self.keepalive_tick().await,
                Step::Event(LinkEvent::Dialed(result)) => self.on_dialed(*result),
                Step::Frame(Some(Ok(ws_msg))) => self.on_frame(ws_msg),
                Step::Frame(Some(Err(e))) => {
                    warn!(name = %self.name, error = %e, "link_read_error");
                    self.mark_closed_and_reattach("read_error");
                }
                Step::Frame(None) => self.mark_closed_and_reattach("remote_closed"),
                Step::Shutdown => break,
            }
        }

        self.timers.cancel_all();
        info!(name = %self.name, "link_supervisor_stopped");
    }

    async fn next_frame(socket: Option<&mut WsStream>) -> Option<Result<WsMessage, WsError>> {
        match socket {
            Some(stream) => stream.next().await,
            // Disabled by the select precondition; never completes
            None => std::future::pending().await,
        }
    }

    fn status(&self) -> LinkStatus {
        *self.status.read()
    }

    fn set_status(&self, status: LinkStatus) -> LinkStatus {
        std::mem::replace(&mut *self.status.write(), status)
    }

    /// Start an open attempt: dial in the background and arm the liveness
    /// check. Called from both the open command and the reattach timer.
    fn begin_open(&mut self) {
        self.want_open = true;
        if self.status() != LinkStatus::Closed {
            debug!(name = %self.name, status = %self.status().as_str(), "link_open_ignored");
            return;
        }

        self.set_status(LinkStatus::Connecting);
        self.timers.cancel(TimerRole::Reattach);
        self.timers.arm(TimerRole::Liveness, self.config.check_connected_wait);

        let endpoint = self.config.endpoint.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = connect_async(endpoint.as_str()).await.map(|(stream, _)| stream);
            let _ = tx.send(LinkEvent::Dialed(Box::new(result))).await;
        });

        info!(name = %self.name, endpoint = %self.config.endpoint, "link_dialing");
    }

    fn on_dialed(&mut self, result: Result<WsStream, WsError>) {
        match result {
            Ok(stream) => {
                if self.status() != LinkStatus::Connecting || !self.want_open {
                    // Closed while the dial was in flight
                    debug!(name = %self.name, "link_dial_result_discarded");
                    return;
                }
                self.socket = Some(stream);
                self.timers.cancel(TimerRole::Liveness);
                self.set_status(LinkStatus::Open);
                info!(name = %self.name, "link_opened");
                (self.callbacks.on_open)();
                self.timers.arm(TimerRole::Keepalive, self.config.ping_interval);
            }
            Err(e) => {
                warn!(name = %self.name, error = %e, "link_dial_failed");
                self.mark_closed_and_reattach("dial_failed");
            }
        }
    }

    /// Loss path: cancel this link's keepalive and liveness timers, report
    /// the close, and schedule exactly one reattach. Sibling links are
    /// untouched.
    fn mark_closed_and_reattach(&mut self, reason: &'static str) {
        self.timers.cancel(TimerRole::Keepalive);
        self.timers.cancel(TimerRole::Liveness);
        self.socket = None;
        self.set_status(LinkStatus::Closed);

        if !self.want_open {
            debug!(name = %self.name, reason = %reason, "link_closed_detached");
            return;
        }

        info!(name = %self.name, reason = %reason, "link_closed");
        (self.callbacks.on_close)();
        self.timers.arm(TimerRole::Reattach, self.config.reopen_socket_wait);
        debug!(
            name = %self.name,
            wait_ms = %self.config.reopen_socket_wait.as_millis(),
            "link_reattach_scheduled"
        );
    }

    /// Deferred check that the open attempt became ready. Some failures
    /// never produce a close or error event; this catches them.
    fn liveness_check(&mut self) {
        match self.status() {
            LinkStatus::Connecting | LinkStatus::Open => {
                trace!(name = %self.name, "link_liveness_ok");
            }
            LinkStatus::Closed => {
                if !self.want_open {
                    return;
                }
                warn!(name = %self.name, "link_silent_failure");
                self.timers.arm(TimerRole::Reattach, self.config.reopen_socket_wait);
            }
        }
    }

    /// Ping chain: send, and re-arm only when the send succeeded. A failed
    /// send already went through the loss path.
    async fn keepalive_tick(&mut self) {
        if self.status() != LinkStatus::Open {
            return;
        }
        if self.transmit(Message::Ping).await.is_ok() {
            self.timers.arm(TimerRole::Keepalive, self.config.ping_interval);
        }
    }

    async fn transmit(&mut self, msg: Message) -> Result<(), ()> {
        let opcode = msg.opcode();
        let Some(socket) = self.socket.as_mut() else {
            // The handle-side status check raced a concurrent close; the
            // frame is lost, per the send contract
            debug!(name = %self.name, opcode = %opcode, "link_send_dropped_not_open");
            return Err(());
        };

        match socket.send(WsMessage::Text(msg.encode())).await {
            Ok(()) => {
                trace!(name = %self.name, opcode = %opcode, "link_frame_sent");
                Ok(())
            }
            Err(e) => {
                warn!(name = %self.name, opcode = %opcode, error = %e, "link_write_error");
                self.mark_closed_and_reattach("write_error");
                Err(())
            }
        }
    }

    fn on_frame(&mut self, ws_msg: WsMessage) {
        match ws_msg {
            WsMessage::Text(raw) => match Message::parse(&raw) {
                // Keepalive reply, consumed here and never forwarded
                Ok(Message::Pong) => trace!(name = %self.name, "link_pong_received"),
                Ok(msg) => {
                    trace!(name = %self.name, opcode = %msg.opcode(), "link_frame_received");
                    (self.callbacks.on_message)(msg);
                }
                Err(e) => {
                    warn!(name = %self.name, error = %e, "link_frame_rejected");
                }
            },
            WsMessage::Close(_) => self.mark_closed_and_reattach("close_frame"),
            // Transport-level ping/pong is handled by the stream itself
            _ => {}
        }
    }

    async fn deliberate_close(&mut self) {
        self.want_open = false;
        self.timers.cancel_all();
        let was = self.set_status(LinkStatus::Closed);
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
        if was != LinkStatus::Closed {
            (self.callbacks.on_close)();
        }
        info!(name = %self.name, "link_closed_by_request");
    }
}
