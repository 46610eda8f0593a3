//! Command line and environment configuration.
//!
//! Connection settings may also come from a JSON file (`--config`), in the
//! same shape older deployments use:
//!
//! ```json
//! { "channel": "bob", "name": "swansonbot", "server": "irc.chat.twitch.tv", "port": "6697" }
//! ```
//!
//! Flags and environment variables win over the file; the file wins over
//! the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use swanson_sdk::client::ConnectConfig;
use swanson_sdk::engine::BotConfig;
use swanson_sdk::ratelimit::RateLimit;

use crate::credentials::Keys;
use crate::quote::SWANSON_API;

const DEFAULT_HOST: &str = "irc.chat.twitch.tv";
const DEFAULT_PORT: u16 = 6697;

#[derive(Parser, Debug)]
#[command(name = "swansonbot", about = "Ron Swanson quotes for your Twitch chat")]
pub struct Args {
    /// JSON file with channel, name, server and port
    #[arg(long, env = "SWANSON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Channel to join (with or without '#'); its owner may run !shutdown
    #[arg(long, env = "SWANSON_CHANNEL")]
    pub channel: Option<String>,

    /// Bot nick
    #[arg(long, env = "SWANSON_NICK")]
    pub nick: Option<String>,

    /// IRC server host [default: irc.chat.twitch.tv]
    #[arg(long, env = "SWANSON_HOST")]
    pub host: Option<String>,

    /// IRC server port [default: 6697]
    #[arg(long, env = "SWANSON_PORT")]
    pub port: Option<u16>,

    /// Connect without TLS
    #[arg(long)]
    pub no_tls: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub tls_insecure: bool,

    /// Dial attempts before giving up
    #[arg(long, default_value_t = 10)]
    pub connect_attempts: u32,

    /// Backoff base in milliseconds; attempt N waits N times this
    #[arg(long, default_value_t = 2000)]
    pub retry_interval_ms: u64,

    /// Timeout for a single dial attempt in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub dial_timeout_ms: u64,

    /// Key file holding the OAuth token
    #[arg(long, env = "SWANSON_KEYS", default_value = ".keys.json")]
    pub keys: PathBuf,

    /// OAuth token (overrides the key file)
    #[arg(long, env = "SWANSON_OAUTH", hide_env_values = true)]
    pub oauth: Option<String>,

    /// Quote API endpoint
    #[arg(long, env = "SWANSON_QUOTES_URL", default_value = SWANSON_API)]
    pub quotes_url: String,
}

/// The `--config` file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub channel: Option<String>,
    /// The bot's nick.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<Port>,
}

/// Ports are written as strings in older files, numbers in newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(u16),
    Text(String),
}

impl Port {
    fn value(&self) -> Result<u16> {
        match self {
            Port::Number(port) => Ok(*port),
            Port::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("Invalid port {text:?} in config file")),
        }
    }
}

impl FileConfig {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid config file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&json).with_context(|| format!("Failed to load {}", path.display()))
    }
}

impl Args {
    /// Merge flags, the `--config` file (if any) and defaults.
    pub fn bot_config(&self) -> Result<BotConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        self.merge(file)
    }

    fn merge(&self, file: FileConfig) -> Result<BotConfig> {
        let channel = self
            .channel
            .clone()
            .or(file.channel)
            .map(|c| normalize_channel(&c))
            .filter(|c| !c.is_empty())
            .context("No channel configured (--channel, SWANSON_CHANNEL or \"channel\" in --config)")?;
        let nick = self
            .nick
            .clone()
            .or(file.name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .context("No nick configured (--nick, SWANSON_NICK or \"name\" in --config)")?;
        let host = self
            .host
            .clone()
            .or(file.server)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match (self.port, file.port) {
            (Some(port), _) => port,
            (None, Some(port)) => port.value()?,
            (None, None) => DEFAULT_PORT,
        };

        Ok(BotConfig {
            channel,
            nick,
            connect: ConnectConfig {
                host,
                port,
                tls: !self.no_tls,
                tls_insecure: self.tls_insecure,
                dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            },
            connect_attempts: self.connect_attempts,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            channel_limit: RateLimit::CHANNEL,
            whisper_limit: RateLimit::WHISPER,
        })
    }

    /// `--oauth` / `SWANSON_OAUTH` if given, the key file otherwise.
    pub fn token(&self) -> Result<String> {
        match self.oauth.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Keys::load(&self.keys)?.token(),
        }
    }
}

/// Twitch channel names are lowercase logins; `JOIN` adds the `#` itself.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flags only; the environment is cleared so `SWANSON_*` cannot leak in.
    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["swansonbot", "--channel", "#Bob", "--nick", "swansonbot"];
        argv.extend_from_slice(extra);
        let parsed = Args::try_parse_from(argv).unwrap();
        Args {
            config: None,
            host: parsed.host.filter(|_| extra.contains(&"--host")),
            port: parsed.port.filter(|_| extra.contains(&"--port")),
            oauth: parsed.oauth.filter(|_| extra.contains(&"--oauth")),
            keys: if extra.contains(&"--keys") {
                parsed.keys.clone()
            } else {
                PathBuf::from(".keys.json")
            },
            ..parsed
        }
    }

    #[test]
    fn defaults_match_twitch() {
        let config = parse(&[]).bot_config().unwrap();
        assert_eq!(config.channel, "bob");
        assert_eq!(config.nick, "swansonbot");
        assert_eq!(config.connect.server_addr(), "irc.chat.twitch.tv:6697");
        assert!(config.connect.tls);
        assert_eq!(config.connect.dial_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_attempts, 10);
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.channel_limit, RateLimit::CHANNEL);
        assert_eq!(config.whisper_limit, RateLimit::WHISPER);
    }

    #[test]
    fn overrides() {
        let config = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "6667",
            "--no-tls",
            "--connect-attempts",
            "3",
            "--retry-interval-ms",
            "50",
        ])
        .bot_config()
        .unwrap();
        assert_eq!(config.connect.server_addr(), "127.0.0.1:6667");
        assert!(!config.connect.tls);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.retry_interval, Duration::from_millis(50));
    }

    #[test]
    fn oauth_flag_wins_over_key_file() {
        let args = parse(&["--oauth", "oauth:cli", "--keys", "/nonexistent/.keys.json"]);
        assert_eq!(args.token().unwrap(), "oauth:cli");
    }

    #[test]
    fn missing_key_file_is_fatal() {
        let args = parse(&["--keys", "/nonexistent/.keys.json"]);
        assert!(args.oauth.is_none());
        let err = args.token().unwrap_err();
        assert!(err.to_string().contains("Failed to read key file"));
    }

    #[test]
    fn config_file_fills_in_missing_settings() {
        let file = FileConfig::parse(
            r##"{"channel": "#Leslie", "name": "ronbot", "server": "irc.example.net", "port": "6667"}"##,
        )
        .unwrap();
        let args = Args {
            channel: None,
            nick: None,
            ..parse(&[])
        };
        let config = args.merge(file).unwrap();
        assert_eq!(config.channel, "leslie");
        assert_eq!(config.nick, "ronbot");
        assert_eq!(config.connect.server_addr(), "irc.example.net:6667");
    }

    #[test]
    fn flags_win_over_config_file() {
        let file = FileConfig::parse(
            r#"{"channel": "leslie", "name": "ronbot", "server": "irc.example.net", "port": 6667}"#,
        )
        .unwrap();
        let config = parse(&["--host", "127.0.0.1", "--port", "7000"])
            .merge(file)
            .unwrap();
        assert_eq!(config.channel, "bob");
        assert_eq!(config.nick, "swansonbot");
        assert_eq!(config.connect.server_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let path = std::env::temp_dir().join(format!("swansonbot-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"channel": "april", "name": "ronbot"}"#).unwrap();
        let args = Args {
            config: Some(path.clone()),
            channel: None,
            nick: None,
            ..parse(&[])
        };
        let config = args.bot_config();
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();
        assert_eq!(config.channel, "april");
        assert_eq!(config.nick, "ronbot");
        assert_eq!(config.connect.server_addr(), "irc.chat.twitch.tv:6697");
    }

    #[test]
    fn missing_channel_or_nick_is_an_error() {
        let args = Args {
            channel: None,
            ..parse(&[])
        };
        assert!(args.merge(FileConfig::default()).is_err());

        let args = Args {
            nick: None,
            ..parse(&[])
        };
        assert!(args.merge(FileConfig::default()).is_err());
    }

    #[test]
    fn bad_port_in_config_file_is_an_error() {
        let file = FileConfig::parse(r#"{"port": "sixty"}"#).unwrap();
        assert!(parse(&[]).merge(file).is_err());
    }

    #[test]
    fn channel_normalization() {
        assert_eq!(normalize_channel("#SomeStreamer"), "somestreamer");
        assert_eq!(normalize_channel(" bob "), "bob");
    }
}
