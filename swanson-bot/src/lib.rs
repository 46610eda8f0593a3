//! swanson-bot: a Twitch chat bot that answers `!swanson` with a Ron Swanson
//! quote.
//!
//! - [`config`]: command line / environment configuration
//! - [`credentials`]: OAuth token from the key file
//! - [`quote`]: the quote API client
//! - [`commands`]: `!swanson` and the owner-only `!shutdown`

pub mod commands;
pub mod config;
pub mod credentials;
pub mod quote;
