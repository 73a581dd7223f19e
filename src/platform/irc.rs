use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::IrcConfig;
use crate::format::{comma_list, strip_control_codes};
use crate::platform::{ChatEndpoint, InboundEvent};
use crate::queue::PendingQueue;

const MAX_LINE_LENGTH: usize = 8192;
const ACTION_MARKER: &str = ":ACTION";

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
    Joined,
}

/// What a single line from the server asks of the client
#[derive(Debug, PartialEq, Eq)]
pub enum ServerLine {
    Ping(String),
    Welcome,
    Event(InboundEvent),
    /// Understood, nothing to do
    Ignored,
    Unhandled,
}

/// Classify one raw line. `channels` holds the lowercase names of joined channels.
/// Split text into the lines that may be sent as message bodies
fn outbound_lines(text: &str) -> Vec<String> {
    text.split(['\r', '\n'])
        .map(|line| line.replace('\0', ""))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

pub fn parse_line(line: &str, channels: &HashSet<String>) -> ServerLine {
    let tokens: Vec<&str> = line.split(' ').collect();

    if tokens[0] == "PING" {
        return match tokens.get(1) {
            Some(token) => ServerLine::Ping(token.to_string()),
            None => ServerLine::Unhandled,
        };
    }

    let Some(command) = tokens.get(1) else {
        return ServerLine::Unhandled;
    };

    match command.to_lowercase().as_str() {
        "001" => ServerLine::Welcome,
        "353" => names_reply(&tokens, channels)
            .map(ServerLine::Event)
            .unwrap_or(ServerLine::Ignored),
        "privmsg" => privmsg(line, channels)
            .map(ServerLine::Event)
            .unwrap_or(ServerLine::Ignored),
        "notice" | "join" | "366" => ServerLine::Ignored,
        _ => ServerLine::Unhandled,
    }
}

// :server 353 nick = #chan :alice @bob carol
fn names_reply(tokens: &[&str], channels: &HashSet<String>) -> Option<InboundEvent> {
    let position = tokens
        .iter()
        .skip(2)
        .position(|t| channels.contains(&t.to_lowercase()))?
        + 2;
    let channel = tokens[position].to_lowercase();

    let names: Vec<&str> = tokens[position + 1..]
        .iter()
        .map(|t| t.trim().trim_start_matches(':'))
        .filter(|t| !t.is_empty())
        .collect();

    Some(InboundEvent::ServiceNotice {
        body: format!("People currently in {} : {}", channel, comma_list(&names)),
    })
}

// :nick!user@host PRIVMSG #chan :body
fn privmsg(line: &str, channels: &HashSet<String>) -> Option<InboundEvent> {
    let mut parts = line.splitn(4, ' ');
    let prefix = parts.next()?;
    let _command = parts.next()?;
    let target = parts.next()?.trim();
    let rest = parts.next()?;

    if !channels.contains(&target.to_lowercase()) {
        return None;
    }

    let author = prefix
        .trim()
        .split('!')
        .next()
        .unwrap_or_default()
        .trim_start_matches(':')
        .to_string();

    if let Some((first, action)) = rest.split_once(' ') {
        if strip_control_codes(first) == ACTION_MARKER {
            return Some(InboundEvent::UserAction {
                source_id: target.to_string(),
                author,
                body: strip_control_codes(action),
            });
        }
    }

    Some(InboundEvent::TextMessage {
        source_id: target.to_string(),
        author,
        body: rest.strip_prefix(':').unwrap_or(rest).to_string(),
    })
}

/// Peek at the socket without consuming anything. EOF or an error means the
/// peer is gone; no pending data means it is still there.
fn is_alive(read_half: &mut OwnedReadHalf) -> bool {
    let mut buf = [0u8; 1];
    match read_half.peek(&mut buf).now_or_never() {
        Some(Ok(0)) | Some(Err(_)) => false,
        Some(Ok(_)) | None => true,
    }
}

/// Client for the IRC side of the bridge.
///
/// Owns one TCP connection at a time. A background read loop parses server
/// lines into [`InboundEvent`]s and reconnects after the configured delay
/// whenever the connection drops.
pub struct IrcClient {
    config: IrcConfig,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<LineWriter>>,
    channels: RwLock<HashSet<String>>,
    events: PendingQueue<InboundEvent>,
    shutdown: CancellationToken,
}

impl IrcClient {
    pub fn new(config: IrcConfig, shutdown: CancellationToken) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            config,
            state,
            writer: Mutex::new(None),
            channels: RwLock::new(HashSet::new()),
            events: PendingQueue::new(),
            shutdown,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The channel bridged to the other side
    pub fn home_channel(&self) -> &str {
        &self.config.channel
    }

    /// Open the connection, start the read loop and wait for the welcome numeric.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            bail!("IRC client is already connected or connecting");
        }

        let deadline = Instant::now() + timeout;
        let mut state_rx = self.state.subscribe();

        let reader = tokio::time::timeout_at(deadline, self.open_transport())
            .await
            .map_err(|_| {
                self.set_state(ConnectionState::Disconnected);
                anyhow::anyhow!("Timed out connecting to {}", self.config.server)
            })??;

        tokio::spawn(self.clone().read_loop(reader));

        let registered = tokio::time::timeout_at(
            deadline,
            state_rx.wait_for(|s| {
                matches!(s, ConnectionState::Registered | ConnectionState::Joined)
            }),
        )
        .await
        .map(|waited| waited.map(|_| ()));

        match registered {
            Ok(Ok(_)) => {
                info!(
                    "Connected to IRC server {}:{} as {}",
                    self.config.server, self.config.port, self.config.nick
                );
                Ok(())
            }
            Ok(Err(_)) => bail!("IRC connection state channel closed"),
            Err(_) => bail!("Timed out after {:?} waiting for IRC registration", timeout),
        }
    }

    /// Join a channel and remember it. Channels are rejoined after a reconnect.
    pub async fn join(&self, channel: &str) {
        let inserted = self.channels.write().await.insert(channel.to_lowercase());
        if !inserted {
            debug!("Already in {}", channel);
            return;
        }

        if let Err(e) = self.send_raw(&format!("JOIN {}", channel)).await {
            warn!("Failed to join {}: {:#}", channel, e);
            return;
        }

        self.state.send_if_modified(|s| {
            if *s == ConnectionState::Registered {
                *s = ConnectionState::Joined;
                true
            } else {
                false
            }
        });
        info!("Joined IRC channel {}", channel);
    }

    /// Post to a channel. Best-effort: if the connection is down the text is dropped.
    ///
    /// Every CR or LF starts a new PRIVMSG, so relayed text can never end the
    /// line early and smuggle in a command of its own.
    pub async fn write(&self, channel: &str, text: &str) {
        for line in outbound_lines(text) {
            if let Err(e) = self.send_raw(&format!("PRIVMSG {} :{}", channel, line)).await {
                warn!("Dropping IRC message to {}: {:#}", channel, e);
                return;
            }
        }
    }

    pub async fn names(&self, channel: &str) {
        if let Err(e) = self.send_raw(&format!("NAMES {}", channel)).await {
            warn!("Failed to request names for {}: {:#}", channel, e);
        }
    }

    /// Non-blocking dequeue of the next parsed event
    #[allow(dead_code)]
    pub fn next_event(&self) -> Option<InboundEvent> {
        self.events.try_pop()
    }

    /// Say goodbye and close the socket. The read loop stops and does not reconnect.
    pub async fn quit(&self, reason: &str) {
        let writer = self.writer.lock().await.take();
        self.shutdown.cancel();
        self.set_state(ConnectionState::Disconnected);

        if let Some(mut writer) = writer {
            if let Err(e) = writer.send(format!("QUIT :{}\r", reason)).await {
                debug!("Failed to send QUIT: {}", e);
            }
            if let Err(e) = SinkExt::<String>::close(&mut writer).await {
                debug!("Failed to close IRC connection: {}", e);
            }
        }
        info!("Disconnected from IRC server {}", self.config.server);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn open_transport(&self) -> Result<LineReader> {
        self.set_state(ConnectionState::Connecting);
        match self.try_open_transport().await {
            Ok(reader) => Ok(reader),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn try_open_transport(&self) -> Result<LineReader> {
        let address = (self.config.server.as_str(), self.config.port);
        let connecting = TcpStream::connect(address);
        let stream = tokio::time::timeout(self.config.connect_timeout(), connecting)
            .await
            .with_context(|| format!("Timed out connecting to {}", self.config.server))?
            .with_context(|| {
                format!(
                    "Failed to connect to {}:{}",
                    self.config.server, self.config.port
                )
            })?;

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        *self.writer.lock().await = Some(FramedWrite::new(write_half, LinesCodec::new()));

        self.send_raw(&format!("NICK {}", self.config.nick)).await?;
        self.send_raw(&self.config.user_line()).await?;

        Ok(reader)
    }

    async fn drop_connection(&self) {
        self.writer.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .context("Connection to IRC server has been lost")?;

        if line.starts_with("PRIVMSG NickServ") {
            debug!("IRC >> PRIVMSG NickServ ****");
        } else {
            debug!("IRC >> {}", line);
        }

        // LinesCodec terminates with \n, IRC wants \r\n
        writer
            .send(format!("{}\r", line))
            .await
            .context("Failed to write to IRC server")
    }

    async fn read_loop(self: Arc<Self>, mut reader: LineReader) {
        loop {
            let reason = self.read_session(&mut reader).await;
            self.drop_connection().await;

            if self.shutdown.is_cancelled() {
                break;
            }

            warn!(
                "IRC connection lost ({}), reconnecting in {:?}",
                reason,
                self.config.reconnect_delay()
            );
            match self.reconnect().await {
                Some(next) => reader = next,
                None => break,
            }
        }
        debug!("IRC read loop stopped");
    }

    /// Read lines until the connection fails. Returns why it ended.
    async fn read_session(&self, reader: &mut LineReader) -> String {
        loop {
            if reader.read_buffer().is_empty() && !is_alive(reader.get_mut()) {
                return "server closed the connection".to_string();
            }

            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return "shutdown".to_string(),
                next = reader.next() => next,
            };

            match next {
                Some(Ok(line)) => self.handle_line(&line).await,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("Discarding IRC line longer than {} bytes", MAX_LINE_LENGTH);
                }
                Some(Err(e)) => return e.to_string(),
                None => return "server closed the connection".to_string(),
            }
        }
    }

    async fn reconnect(&self) -> Option<LineReader> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }

            info!(
                "Reconnecting to IRC server {}:{}",
                self.config.server, self.config.port
            );
            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                attempt = self.open_transport() => attempt,
            };
            match attempt {
                Ok(reader) => return Some(reader),
                Err(e) => warn!("IRC reconnect failed: {:#}", e),
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        debug!("IRC << {}", line);

        let parsed = {
            let channels = self.channels.read().await;
            parse_line(line, &channels)
        };

        match parsed {
            ServerLine::Ping(token) => {
                if let Err(e) = self.send_raw(&format!("PONG {}", token)).await {
                    warn!("Failed to answer PING: {:#}", e);
                }
            }
            ServerLine::Welcome => self.on_welcome().await,
            ServerLine::Event(event) => self.events.push(event),
            ServerLine::Ignored => {}
            ServerLine::Unhandled => debug!("Unhandled IRC input: {}", line),
        }
    }

    async fn on_welcome(&self) {
        if !self.config.password.trim().is_empty() {
            let identify = format!("PRIVMSG NickServ Identify {}", self.config.password);
            if let Err(e) = self.send_raw(&identify).await {
                warn!("Failed to identify with NickServ: {:#}", e);
            }
            // Give services time to apply the identity before joining anything
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.identify_delay()) => {}
            }
        }

        let channels: Vec<String> = self.channels.read().await.iter().cloned().collect();
        for channel in &channels {
            if let Err(e) = self.send_raw(&format!("JOIN {}", channel)).await {
                warn!("Failed to rejoin {}: {:#}", channel, e);
            }
        }

        self.set_state(if channels.is_empty() {
            ConnectionState::Registered
        } else {
            ConnectionState::Joined
        });
    }
}

#[async_trait]
impl ChatEndpoint for IrcClient {
    fn name(&self) -> &'static str {
        "irc"
    }

    async fn recv(&self) -> Option<InboundEvent> {
        self.events.pop().await
    }

    async fn post(&self, text: &str) {
        self.write(&self.config.channel, text).await;
    }

    async fn request_roster(&self) {
        self.names(&self.config.channel).await;
    }
}
