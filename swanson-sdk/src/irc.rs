//! Twitch IRC line handling.
//!
//! Inbound lines are classified into a typed [`Message`] by [`classify`];
//! outbound traffic is expressed as [`Frame`]s and rendered with
//! [`Frame::to_wire`].
//!
//! The grammar is deliberately narrow. Only the frames a chat bot acts on are
//! parsed; everything else is passed through as [`MessageKind::Unknown`]:
//!
//! ```text
//! :<name>!<user>@<label>.tmi.twitch.tv PRIVMSG #<channel>[ :<text>]
//! :<name>!<user>@<label>.tmi.twitch.tv NOTICE #<channel>[ :<text>]
//! :<name>!<user>@<label>.tmi.twitch.tv WHISPER <target>[ :<text>]
//! ```

use std::fmt;

/// Keep-alive probe sent by the server. Must be answered with [`Frame::Pong`].
pub const PING_PROBE: &str = "PING :tmi.twitch.tv";

/// Sender recorded for server notices.
pub const SERVER_SENDER: &str = "server";

/// Capability requested at registration so whispers and notices are delivered.
pub const COMMANDS_CAPABILITY: &str = "twitch.tv/commands";

const HOST_SUFFIX: &str = ".tmi.twitch.tv";

/// Kind of an inbound line. Exactly one per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    ChatMessage,
    Notice,
    Whisper,
    /// A channel message whose text is `!word` or `!word word`.
    ChatCommand,
    /// A whisper whose text is `!word` or `!word word`.
    WhisperCommand,
    Unknown,
}

impl MessageKind {
    pub fn is_command(self) -> bool {
        matches!(self, MessageKind::ChatCommand | MessageKind::WhisperCommand)
    }

    pub fn is_whisper(self) -> bool {
        matches!(self, MessageKind::Whisper | MessageKind::WhisperCommand)
    }
}

/// A classified inbound line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: String,
    sender: String,
    kind: MessageKind,
}

impl Message {
    pub fn new(kind: MessageKind, sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            sender: sender.into(),
            kind,
        }
    }

    fn ping() -> Self {
        Self::new(MessageKind::Ping, "", "")
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Nick of the author; empty for server-originated lines.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Command name without the leading `!`, for command kinds only.
    pub fn command_name(&self) -> Option<&str> {
        if !self.kind.is_command() {
            return None;
        }
        self.payload
            .strip_prefix('!')
            .and_then(|body| body.split_whitespace().next())
    }

    /// Optional single argument following the command name.
    pub fn command_arg(&self) -> Option<&str> {
        if !self.kind.is_command() {
            return None;
        }
        self.payload.split_whitespace().nth(1)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Ping => f.write_str("PING"),
            MessageKind::Unknown => f.write_str(&self.payload),
            MessageKind::Whisper | MessageKind::WhisperCommand => {
                write!(f, "{} (whisper): {}", self.sender, self.payload)
            }
            _ => write!(f, "{}: {}", self.sender, self.payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed line: {0:?}")]
    Malformed(String),
}

/// Classify one raw line (without its trailing CRLF).
pub fn classify(line: &str) -> Result<Message, ParseError> {
    if line == PING_PROBE {
        return Ok(Message::ping());
    }

    let mut tokens = line.split_whitespace();
    let (Some(_prefix), Some(kind)) = (tokens.next(), tokens.next()) else {
        return Err(ParseError::Malformed(line.to_string()));
    };

    match kind {
        "PRIVMSG" => {
            let frame = parse_frame(line, kind, Target::Channel)
                .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
            let kind = if is_command(frame.text) {
                MessageKind::ChatCommand
            } else {
                MessageKind::ChatMessage
            };
            Ok(Message::new(kind, frame.name, frame.text))
        }
        "NOTICE" => {
            let frame = parse_frame(line, kind, Target::Channel)
                .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
            Ok(Message::new(MessageKind::Notice, SERVER_SENDER, frame.text))
        }
        "WHISPER" => {
            let frame = parse_frame(line, kind, Target::User)
                .ok_or_else(|| ParseError::Malformed(line.to_string()))?;
            let kind = if is_command(frame.text) {
                MessageKind::WhisperCommand
            } else {
                MessageKind::Whisper
            };
            Ok(Message::new(kind, frame.name, frame.text))
        }
        _ => Ok(Message::new(MessageKind::Unknown, "", line)),
    }
}

/// `!word` or `!word word`, nothing more.
pub fn is_command(text: &str) -> bool {
    let Some(body) = text.strip_prefix('!') else {
        return false;
    };
    match body.split_once(char::is_whitespace) {
        None => is_word(body),
        Some((name, arg)) => is_word(name) && is_word(arg),
    }
}

#[derive(Clone, Copy)]
enum Target {
    Channel,
    User,
}

struct Parsed<'a> {
    name: &'a str,
    text: &'a str,
}

fn parse_frame<'a>(line: &'a str, kind: &str, target: Target) -> Option<Parsed<'a>> {
    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let (name, user_host) = prefix.split_once('!')?;
    let (user, host) = user_host.split_once('@')?;
    let label = host.strip_suffix(HOST_SUFFIX)?;
    if !(is_word(name) && is_word(user) && is_word(label)) {
        return None;
    }

    let rest = rest.strip_prefix(kind)?.strip_prefix(' ')?;
    let (addressee, text) = match rest.split_once(' ') {
        Some((addressee, trailing)) => (addressee, trailing.strip_prefix(':')?),
        None => (rest, ""),
    };
    let addressee = match target {
        Target::Channel => addressee.strip_prefix('#')?,
        Target::User => addressee,
    };
    if !is_word(addressee) {
        return None;
    }

    Some(Parsed { name, text })
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Pass(String),
    Nick(String),
    CapReq(String),
    /// Channel name without the leading `#`.
    Join(String),
    Privmsg {
        channel: String,
        text: String,
    },
    /// Whispers are an in-room `/w` directive rather than a frame type of
    /// their own. The wire form carries no trailing CRLF.
    Whisper {
        channel: String,
        user: String,
        text: String,
    },
    Pong,
}

impl Frame {
    /// Exact bytes to put on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Frame::Pass(token) => format!("PASS {token}\r\n"),
            Frame::Nick(nick) => format!("NICK {nick}\r\n"),
            Frame::CapReq(cap) => format!("CAP REQ :{cap}\r\n"),
            Frame::Join(channel) => format!("JOIN #{channel}\r\n"),
            Frame::Privmsg { channel, text } => format!("PRIVMSG #{channel} :{text}\r\n"),
            Frame::Whisper {
                channel,
                user,
                text,
            } => format!("PRIVMSG #{channel} :/w {user} {text}"),
            Frame::Pong => "PONG :tmi.twitch.tv\r\n".to_string(),
        }
    }

    /// Verb for log lines. Never includes arguments, so `PASS` stays secret.
    pub fn verb(&self) -> &'static str {
        match self {
            Frame::Pass(_) => "PASS",
            Frame::Nick(_) => "NICK",
            Frame::CapReq(_) => "CAP",
            Frame::Join(_) => "JOIN",
            Frame::Privmsg { .. } | Frame::Whisper { .. } => "PRIVMSG",
            Frame::Pong => "PONG",
        }
    }
}
