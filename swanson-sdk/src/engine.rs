//! The chat engine: one connection, one channel, one read loop.
//!
//! [`ChatEngine::start`] dials with backoff, registers, joins and then runs
//! the read loop until a shutdown is requested or the session fails. Every
//! inbound line is classified; keep-alive probes are answered right away,
//! commands go to the [`CommandRouter`], everything else is logged.
//!
//! Outbound chat goes through [`ChatEngine::say`] and [`ChatEngine::whisper`],
//! each gated by its own [`TokenBucket`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::bot::CommandRouter;
use crate::client::{ConnectConfig, Connection, ConnectionError};
use crate::event::Event;
use crate::irc::{self, Frame, Message, MessageKind, ParseError};
use crate::ratelimit::{RateLimit, TokenBucket};

/// Bot settings. Read once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Channel to join, without `#`. Its owner may run owner commands.
    pub channel: String,
    /// Display name used for `NICK`.
    pub nick: String,
    pub connect: ConnectConfig,
    /// Dial attempts before giving up.
    pub connect_attempts: u32,
    /// Attempt `i` waits `i * retry_interval`.
    pub retry_interval: Duration,
    pub channel_limit: RateLimit,
    pub whisper_limit: RateLimit,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            nick: String::new(),
            connect: ConnectConfig::default(),
            connect_attempts: 10,
            retry_interval: Duration::from_secs(2),
            channel_limit: RateLimit::CHANNEL,
            whisper_limit: RateLimit::WHISPER,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SayError {
    #[error("must provide a message to say")]
    EmptyMessage,
    #[error("message must be a single line")]
    LineBreak,
    #[error(transparent)]
    Send(#[from] ConnectionError),
}

#[derive(Debug, thiserror::Error)]
pub enum WhisperError {
    #[error("must provide both a message and a user to whisper")]
    EmptyArgument,
    #[error("whisper user and message must be a single line")]
    LineBreak,
    #[error(transparent)]
    Send(#[from] ConnectionError),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to connect after {0} attempts")]
    ConnectAttemptsExhausted(u32),
    #[error("failed to send registration: {0}")]
    Join(#[source] ConnectionError),
    #[error("channel read failed: {0}")]
    Read(#[source] ConnectionError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub struct ChatEngine {
    config: BotConfig,
    connection: Connection,
    channel_limiter: TokenBucket,
    whisper_limiter: TokenBucket,
    router: CommandRouter,
    shutdown_tx: watch::Sender<bool>,
    events: broadcast::Sender<Event>,
}

impl ChatEngine {
    /// Build the engine and start both token buckets. The router's owner is
    /// set to the configured channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BotConfig, router: CommandRouter) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            connection: Connection::new(config.connect.clone()),
            channel_limiter: TokenBucket::from_limit(config.channel_limit),
            whisper_limiter: TokenBucket::from_limit(config.whisper_limit),
            router: router.with_owner(config.channel.clone()),
            shutdown_tx,
            events,
            config,
        })
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn channel_limiter(&self) -> &TokenBucket {
        &self.channel_limiter
    }

    pub fn whisper_limiter(&self) -> &TokenBucket {
        &self.whisper_limiter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Connect (with backoff), register, join and run the read loop.
    ///
    /// Returns `Ok(())` after a requested shutdown. Running out of connection
    /// attempts returns before the loop is ever entered.
    pub async fn start(self: &Arc<Self>, token: &str) -> Result<(), EngineError> {
        let attempts = self.config.connect_attempts;
        if !self
            .connection
            .reconnect_with_backoff(attempts, self.config.retry_interval)
            .await
        {
            return Err(EngineError::ConnectAttemptsExhausted(attempts));
        }
        self.emit(Event::Connected);

        if let Err(e) = self
            .connection
            .authenticate_and_join(token, &self.config.nick, &self.config.channel)
            .await
        {
            self.connection.disconnect().await;
            return Err(EngineError::Join(e));
        }
        self.emit(Event::Joined {
            channel: self.config.channel.clone(),
            nick: self.config.nick.clone(),
        });

        self.run().await
    }

    /// The read loop. The caller must have connected and joined already.
    pub async fn run(self: &Arc<Self>) -> Result<(), EngineError> {
        tracing::info!(channel = %self.config.channel, "Watching chat");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let result = loop {
            if *shutdown_rx.borrow_and_update() {
                break Ok(());
            }

            let read = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => continue,
                read = self.connection.read_line() => read,
            };

            let line = match read {
                Ok(line) => line,
                Err(_) if self.is_shutting_down() => break Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "Channel read failed");
                    break Err(EngineError::Read(e));
                }
            };

            match irc::classify(&line) {
                Ok(msg) => self.handle_message(msg).await,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to classify line, ending session");
                    break Err(EngineError::Parse(e));
                }
            }
        };

        self.connection.disconnect().await;
        let reason = match &result {
            Ok(()) => "shutdown".to_string(),
            Err(e) => e.to_string(),
        };
        self.emit(Event::Disconnected { reason });
        result
    }

    async fn handle_message(self: &Arc<Self>, msg: Message) {
        self.emit(Event::Message(msg.clone()));

        match msg.kind() {
            MessageKind::Ping => {
                tracing::debug!("PING");
                match self.connection.write_frame(&Frame::Pong).await {
                    Ok(()) => self.emit(Event::Pong),
                    Err(e) => tracing::warn!(error = %e, "Failed to answer PING"),
                }
            }
            MessageKind::ChatMessage | MessageKind::Whisper | MessageKind::Notice => {
                tracing::info!("#{}", msg);
            }
            MessageKind::ChatCommand | MessageKind::WhisperCommand => {
                tracing::info!("#{}", msg);
                self.router.dispatch(msg, self);
            }
            MessageKind::Unknown => {
                tracing::debug!(line = msg.payload(), "Unhandled line");
            }
        }
    }

    /// Send `text` to the channel, waiting for a channel token first.
    pub async fn say(&self, text: &str) -> Result<(), SayError> {
        if text.is_empty() {
            return Err(SayError::EmptyMessage);
        }
        if has_line_break(text) {
            return Err(SayError::LineBreak);
        }
        self.channel_limiter.acquire().await;
        self.connection
            .write_frame(&Frame::Privmsg {
                channel: self.config.channel.clone(),
                text: text.to_string(),
            })
            .await?;
        tracing::info!("{}: {}", self.config.nick, text);
        self.emit(Event::Sent {
            target: format!("#{}", self.config.channel),
            text: text.to_string(),
        });
        Ok(())
    }

    /// Whisper `text` to `user`, waiting for a whisper token first.
    pub async fn whisper(&self, user: &str, text: &str) -> Result<(), WhisperError> {
        if user.is_empty() || text.is_empty() {
            return Err(WhisperError::EmptyArgument);
        }
        if has_line_break(user) || has_line_break(text) {
            return Err(WhisperError::LineBreak);
        }
        self.whisper_limiter.acquire().await;
        self.connection
            .write_frame(&Frame::Whisper {
                channel: self.config.channel.clone(),
                user: user.to_string(),
                text: text.to_string(),
            })
            .await?;
        tracing::info!("{}: @{} {}", self.config.nick, user, text);
        self.emit(Event::Sent {
            target: user.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    /// Close the connection, end the read loop and stop both token buckets.
    pub async fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            tracing::info!("Shutdown requested, signing off");
        }
        self.connection.disconnect().await;
        self.channel_limiter.stop();
        self.whisper_limiter.stop();
    }
}

/// One call writes one frame for one token; CR or LF would smuggle in more.
fn has_line_break(text: &str) -> bool {
    text.contains(['\r', '\n'])
}
