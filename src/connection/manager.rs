//! Connection manager with verified connect and ping/pong heartbeat

use crate::transport::{TransportConnector, TransportStream};
use bytes::Bytes;
use linkwatch_shared::{
    codec::{self, LineDecoder},
    error::Result as LinkResult,
    heartbeat, Action, LinkError, LivenessMachine, PING,
};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A verified link went away (heartbeat missed or transport closed)
    Disconnected,
    /// Received a line that is not a control token
    Received(String),
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay between an answered ping and the next one
    pub ping_interval: Duration,
    /// How long a ping may stay unanswered
    pub ping_timeout: Duration,
    /// Upper bound for opening the transport
    pub open_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(heartbeat::PING_INTERVAL_MS),
            ping_timeout: Duration::from_millis(heartbeat::PING_TIMEOUT_MS),
            open_timeout: Duration::from_millis(heartbeat::OPEN_TIMEOUT_MS),
        }
    }
}

impl ConnectionConfig {
    pub fn with_ping_interval_ms(mut self, ms: u64) -> Self {
        self.ping_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_ping_timeout_ms(mut self, ms: u64) -> Self {
        self.ping_timeout = Duration::from_millis(ms);
        self
    }
}

/// Snapshot of the link published after every processed event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Transport physically open
    pub open: bool,
    /// Remote answered and no deadline was missed since
    pub alive: bool,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.open && self.alive
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<LinkResult<()>>,
    },
    Send {
        payload: String,
        reply: oneshot::Sender<LinkResult<usize>>,
    },
    Close,
}

/// Handle to a liveness-verified link
///
/// The link itself runs on its own task; dropping the handle closes the
/// transport and stops that task.
pub struct ConnectionManager {
    config: ConnectionConfig,
    /// Channel to send commands to the link task
    command_tx: mpsc::Sender<Command>,
    /// Channel to receive connection events
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    status_rx: watch::Receiver<LinkStatus>,
}

impl ConnectionManager {
    /// Create a new connection manager and start its link task
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called.
    pub fn new<C: TransportConnector>(config: ConnectionConfig, connector: C) -> Self {
        let (command_tx, command_rx) = mpsc::channel::<Command>(100);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());

        let link = Link::new(config.clone(), connector, event_tx, status_tx);
        tokio::spawn(link.run(command_rx));

        Self {
            config,
            command_tx,
            event_rx,
            status_rx,
        }
    }

    /// Open the transport and wait for the remote to answer the first ping
    pub async fn connect(&self) -> LinkResult<()> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::Connect { reply }).await?;
        response.await.map_err(|_| LinkError::ManagerClosed)?
    }

    /// Send one line of application data, returning the bytes written
    pub async fn send_data(&self, payload: impl Into<String>) -> LinkResult<usize> {
        let (reply, response) = oneshot::channel();
        self.submit(Command::Send {
            payload: payload.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| LinkError::ManagerClosed)?
    }

    /// Request transport closure
    ///
    /// Completion is reported as a [`ConnectionEvent::Disconnected`] if the
    /// link had been verified.
    pub async fn close(&self) -> LinkResult<()> {
        self.submit(Command::Close).await
    }

    /// Transport open and remote alive
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Transport physically open, whether or not the remote answers
    pub fn is_open(&self) -> bool {
        self.status_rx.borrow().open
    }

    pub fn status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn submit(&self, command: Command) -> LinkResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| LinkError::ManagerClosed)
    }
}

/// Everything the link task can wake up for
enum Input {
    Command(Command),
    Read(io::Result<usize>),
    Deadline,
    Detached,
}

/// State owned by the link task
struct Link<C: TransportConnector> {
    config: ConnectionConfig,
    connector: C,
    machine: LivenessMachine,
    stream: Option<C::Stream>,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
    /// The single outstanding verification, interval or pong deadline
    deadline: Option<Instant>,
    pending_connect: Option<oneshot::Sender<LinkResult<()>>>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    status_tx: watch::Sender<LinkStatus>,
}

impl<C: TransportConnector> Link<C> {
    fn new(
        config: ConnectionConfig,
        connector: C,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
        status_tx: watch::Sender<LinkStatus>,
    ) -> Self {
        let machine = LivenessMachine::new(config.ping_interval, config.ping_timeout);
        Self {
            config,
            connector,
            machine,
            stream: None,
            decoder: LineDecoder::new(),
            read_buf: vec![0u8; 4096],
            deadline: None,
            pending_connect: None,
            event_tx,
            status_tx,
        }
    }

    /// Main loop: every input goes through `dispatch` in arrival order
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let input = self.next_input(&mut commands).await;
            if matches!(input, Input::Detached) {
                break;
            }
            self.dispatch(input).await;
            self.publish_status();
        }

        self.shutdown_stream().await;
        debug!("[LINK] Connection task stopped");
    }

    async fn next_input(&mut self, commands: &mut mpsc::Receiver<Command>) -> Input {
        // A remote that never stops sending must not hold off the deadline
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Input::Deadline;
        }
        let deadline = self.deadline;

        tokio::select! {
            // Commands, then bytes already received, then a deadline noticed in the same poll
            biased;

            command = commands.recv() => match command {
                Some(command) => Input::Command(command),
                None => Input::Detached,
            },

            result = read_chunk(self.stream.as_mut(), &mut self.read_buf) => Input::Read(result),

            () = wait_for(deadline) => Input::Deadline,
        }
    }

    async fn dispatch(&mut self, input: Input) {
        match input {
            Input::Command(Command::Connect { reply }) => self.handle_connect(reply).await,
            Input::Command(Command::Send { payload, reply }) => {
                let result = self.handle_send(&payload).await;
                let _ = reply.send(result);
            }
            Input::Command(Command::Close) => {
                if self.stream.is_some() {
                    info!("[LINK] Closing transport on request");
                    self.apply(vec![Action::CloseTransport]).await;
                }
            }
            Input::Read(Ok(0)) => {
                info!("[LINK] Transport closed by remote");
                self.apply(vec![Action::CloseTransport]).await;
            }
            Input::Read(Ok(n)) => self.handle_bytes(n).await,
            Input::Read(Err(e)) if is_disconnect(&e) => {
                info!("[LINK] Transport lost: {}", e);
                self.apply(vec![Action::CloseTransport]).await;
            }
            Input::Read(Err(e)) => {
                warn!("[LINK] Transport error event: {}", e);
            }
            Input::Deadline => {
                self.deadline = None;
                let actions = self.machine.on_timer();
                self.apply(actions).await;
            }
            Input::Detached => {}
        }
    }

    async fn handle_connect(&mut self, reply: oneshot::Sender<LinkResult<()>>) {
        if self.pending_connect.is_some() {
            let _ = reply.send(Err(LinkError::ConnectInProgress));
            return;
        }
        if self.status().is_connected() {
            let _ = reply.send(Ok(()));
            return;
        }

        if self.stream.is_none() {
            if let Err(e) = self.open_transport().await {
                let _ = reply.send(Err(LinkError::OpenFailed(e)));
                return;
            }
        } else {
            debug!("[LINK] Transport already open, verifying again");
        }

        self.pending_connect = Some(reply);
        let actions = self.machine.begin_verification();
        self.apply(actions).await;
    }

    async fn open_transport(&mut self) -> io::Result<()> {
        info!(
            "[LINK] Opening {} transport {}",
            self.connector.name(),
            self.connector.target()
        );

        let stream = match timeout(self.config.open_timeout, self.connector.open()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("[LINK] Error opening transport: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "[LINK] Opening transport timed out after {:?}",
                    self.config.open_timeout
                );
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "transport open timed out",
                ));
            }
        };

        info!("[LINK] Transport opened");
        self.decoder.clear();
        self.stream = Some(stream);
        self.publish_status();
        Ok(())
    }

    async fn handle_send(&mut self, payload: &str) -> LinkResult<usize> {
        if !self.status().is_connected() {
            debug!("[LINK] Device is not connected, cannot send data");
            return Err(LinkError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        debug!("[LINK] Sending data to device: {}", payload);
        let frame = codec::encode(payload);
        let len = frame.len();
        write_frame(stream, frame, self.config.ping_timeout).await.map_err(|e| {
            warn!("[LINK] Error sending data to device: {}", e);
            LinkError::WriteFailed(e)
        })?;

        Ok(len)
    }

    async fn handle_bytes(&mut self, n: usize) {
        self.decoder.extend(&self.read_buf[..n]);

        loop {
            match self.decoder.decode_next() {
                Ok(Some(line)) => {
                    trace!("[LINK] Received line: {:?}", line);
                    let actions = self.machine.on_line(&line);
                    self.apply(actions).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[LINK] Discarding received data: {}", e);
                    break;
                }
            }
        }
    }

    /// Carry out state machine actions in order
    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                Action::SendChallenge => self.send_challenge().await,
                Action::ArmTimer(delay) => self.deadline = Some(Instant::now() + delay),
                Action::CancelTimer => self.deadline = None,
                Action::CloseTransport => {
                    if self.shutdown_stream().await {
                        queue.extend(self.machine.on_closed());
                    }
                }
                Action::ResolveConnect(result) => {
                    self.publish_status();
                    if let Some(reply) = self.pending_connect.take() {
                        match &result {
                            Ok(()) => info!("[LINK] Connection verified"),
                            Err(e) => warn!("[LINK] Connect failed: {}", e),
                        }
                        let _ = reply.send(result);
                    }
                }
                Action::NotifyDisconnect => {
                    self.publish_status();
                    warn!("[LINK] Device disconnected");
                    let _ = self.event_tx.send(ConnectionEvent::Disconnected);
                }
                Action::Deliver(line) => {
                    debug!("[LINK] Received data from device: {}", line);
                    let _ = self.event_tx.send(ConnectionEvent::Received(line));
                }
            }
        }
    }

    async fn send_challenge(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        trace!("[LINK] Sending {}", PING);
        if let Err(e) = write_frame(stream, codec::encode(PING), self.config.ping_timeout).await {
            // A lost ping shows up as a missed pong
            warn!("[LINK] Error sending ping to device: {}", e);
        }
    }

    /// Close and drop the stream; returns whether one was open
    async fn shutdown_stream(&mut self) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return false;
        };

        if let Err(e) = stream.close().await {
            debug!("[LINK] Error closing transport: {}", e);
        }
        self.decoder.clear();
        info!("[LINK] Transport closed");
        true
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            open: self.stream.is_some(),
            alive: self.machine.is_alive(),
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

async fn read_chunk<S: TransportStream>(stream: Option<&mut S>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write and flush one frame, giving up after `limit`
async fn write_frame<S: TransportStream>(stream: &mut S, frame: Bytes, limit: Duration) -> io::Result<()> {
    let write = async {
        stream.write_all(&frame).await?;
        stream.flush().await
    };

    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "transport write timed out")),
    }
}

/// Read errors that mean the transport itself is gone, like EOF
///
/// Every other read error is only logged.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
