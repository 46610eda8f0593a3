//! Events emitted by the chat engine for observers to consume.

use crate::irc::Message;

/// Events that the engine broadcasts to subscribers (bots, tests, a UI).
#[derive(Debug, Clone)]
pub enum Event {
    /// Transport established to the server.
    Connected,

    /// PASS/NICK/CAP/JOIN frames were written. The server does not confirm
    /// the join synchronously, so this only means the request went out.
    Joined {
        channel: String,
        nick: String,
    },

    /// A classified inbound line (chat, whisper, notice, command, unknown).
    Message(Message),

    /// Keep-alive probe answered.
    Pong,

    /// Something we wrote to the channel (`say`) or to a user (`whisper`).
    Sent {
        target: String,
        text: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },
}
