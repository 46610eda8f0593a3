//! swanson-sdk: protocol engine for Twitch-flavoured IRC chat bots.
//!
//! - [`client`]: TLS connection lifecycle with bounded retry/backoff
//! - [`irc`]: inbound line classification and outbound frames
//! - [`ratelimit`]: token buckets gating outbound traffic
//! - [`bot`]: command routing with owner-only commands
//! - [`engine`]: the read loop tying it all together

pub mod bot;
pub mod client;
pub mod engine;
pub mod event;
pub mod irc;
pub mod ratelimit;
