//! Command routing for chat bots.
//!
//! Commands are `!name` or `!name arg` lines, either in the channel or in a
//! whisper. Handlers are registered with a name and a description and run as
//! detached tasks, so a slow handler never stalls the read loop:
//!
//! ```rust,no_run
//! use swanson_sdk::bot::CommandRouter;
//!
//! let mut router = CommandRouter::new();
//! router.command("ping", "Check if the bot is alive", |ctx| {
//!     Box::pin(async move {
//!         ctx.reply("pong").await
//!     })
//! });
//! router.owner_command("shutdown", "Disconnect the bot", |ctx| {
//!     Box::pin(async move {
//!         ctx.engine.shutdown().await;
//!         Ok(())
//!     })
//! });
//! ```
//!
//! Owner commands are only visible to the channel owner. For anyone else they
//! behave exactly like an unknown command.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::engine::ChatEngine;
use crate::irc::Message;

/// Boxed async command handler.
pub type Handler =
    Arc<dyn Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Who may invoke a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Anyone,
    /// Only the channel owner (the account whose channel the bot joined).
    Owner,
}

struct Registered {
    description: String,
    access: Access,
    handler: Handler,
}

/// Everything a handler gets to work with.
pub struct CommandContext {
    pub engine: Arc<ChatEngine>,
    pub message: Message,
}

impl CommandContext {
    pub fn sender(&self) -> &str {
        self.message.sender()
    }

    pub fn arg(&self) -> Option<&str> {
        self.message.command_arg()
    }

    pub fn is_whisper(&self) -> bool {
        self.message.kind().is_whisper()
    }

    /// Reply on the same path the command came in on: a whisper back to the
    /// sender for whisper commands, the channel otherwise.
    pub async fn reply(&self, text: &str) -> anyhow::Result<()> {
        if self.is_whisper() {
            self.engine.whisper(self.sender(), text).await?;
        } else {
            self.engine.say(text).await?;
        }
        Ok(())
    }
}

/// Maps command messages to registered handlers.
#[derive(Default)]
pub struct CommandRouter {
    owner: String,
    commands: HashMap<String, Registered>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the owner identity. [`ChatEngine::new`] sets this to the
    /// configured channel.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Register a command anyone may invoke. `name` is given without `!`.
    pub fn command<F>(&mut self, name: &str, description: &str, handler: F) -> &mut Self
    where
        F: Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.register(name, description, Access::Anyone, Arc::new(handler))
    }

    /// Register a command only the channel owner may invoke.
    pub fn owner_command<F>(&mut self, name: &str, description: &str, handler: F) -> &mut Self
    where
        F: Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.register(name, description, Access::Owner, Arc::new(handler))
    }

    fn register(&mut self, name: &str, description: &str, access: Access, handler: Handler) -> &mut Self {
        let name = name.trim_start_matches('!').to_ascii_lowercase();
        self.commands.insert(
            name,
            Registered {
                description: description.to_string(),
                access,
                handler,
            },
        );
        self
    }

    pub fn is_owner(&self, sender: &str) -> bool {
        !self.owner.is_empty() && sender.eq_ignore_ascii_case(&self.owner)
    }

    /// `(name, description)` of every registered command, sorted by name.
    pub fn help(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self
            .commands
            .iter()
            .map(|(name, cmd)| (name.as_str(), cmd.description.as_str()))
            .collect();
        entries.sort_unstable();
        entries
    }

    fn lookup(&self, msg: &Message) -> Option<&Registered> {
        let name = msg.command_name()?.to_ascii_lowercase();
        let cmd = self.commands.get(&name)?;
        match cmd.access {
            Access::Anyone => Some(cmd),
            Access::Owner if self.is_owner(msg.sender()) => Some(cmd),
            Access::Owner => None,
        }
    }

    /// Whether `msg` would run a handler if dispatched.
    pub fn accepts(&self, msg: &Message) -> bool {
        self.lookup(msg).is_some()
    }

    /// Spawn the handler for `msg`, if any.
    ///
    /// The returned handle is only for observers; the engine never joins it.
    /// Handler errors are logged and go nowhere else.
    pub fn dispatch(&self, msg: Message, engine: &Arc<ChatEngine>) -> Option<JoinHandle<()>> {
        let Some(cmd) = self.lookup(&msg) else {
            tracing::info!(sender = msg.sender(), command = msg.payload(), "Unrecognized command");
            return None;
        };

        let handler = cmd.handler.clone();
        let command = msg.payload().to_string();
        let ctx = CommandContext {
            engine: engine.clone(),
            message: msg,
        };
        Some(tokio::spawn(async move {
            if let Err(e) = handler(ctx).await {
                tracing::error!(error = %e, %command, "Command handler failed");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::MessageKind;

    fn router() -> CommandRouter {
        let mut router = CommandRouter::new().with_owner("bob");
        router
            .command("swanson", "Ron Swanson wisdom", |_| Box::pin(async { Ok(()) }))
            .owner_command("!shutdown", "Disconnect", |_| Box::pin(async { Ok(()) }));
        router
    }

    fn cmd(sender: &str, text: &str) -> Message {
        Message::new(MessageKind::ChatCommand, sender, text)
    }

    #[test]
    fn anyone_may_use_public_commands() {
        let router = router();
        assert!(router.accepts(&cmd("alice", "!swanson")));
        assert!(router.accepts(&cmd("bob", "!swanson please")));
        assert!(router.accepts(&Message::new(MessageKind::WhisperCommand, "carol", "!SWANSON")));
    }

    #[test]
    fn owner_commands_are_invisible_to_others() {
        let router = router();
        assert!(router.accepts(&cmd("bob", "!shutdown")));
        assert!(router.accepts(&cmd("Bob", "!shutdown")));
        assert!(!router.accepts(&cmd("alice", "!shutdown")));
        assert!(!router.accepts(&cmd("", "!shutdown")));
    }

    #[test]
    fn unknown_and_non_command_messages_are_rejected() {
        let router = router();
        assert!(!router.accepts(&cmd("alice", "!dance")));
        assert!(!router.accepts(&Message::new(MessageKind::ChatMessage, "bob", "!shutdown")));
    }

    #[test]
    fn empty_owner_matches_nobody() {
        let router = CommandRouter::new();
        assert!(!router.is_owner(""));
        assert!(!router.is_owner("bob"));
    }

    #[test]
    fn help_lists_commands_sorted() {
        let router = router();
        assert_eq!(
            router.help(),
            vec![("shutdown", "Disconnect"), ("swanson", "Ron Swanson wisdom")]
        );
    }
}
