//! Configuration surfaces (ambient stack, SPEC_FULL §D).
//!
//! The relay is the only component with a CLI/env surface (spec §6); the
//! replica itself is a library and is configured by the embedding
//! application, not by argv.

use crate::transport::ReconnectPolicy;
use clap::Parser;
use std::time::Duration;

/// The relay binary's entire surface: one environment variable, no
/// subcommands, no flags (spec §6).
#[derive(Debug, Parser)]
#[command(version, about = "Stateless fan-out relay for liveshare replicas")]
pub struct RelayConfig {
    /// TCP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,
}

impl RelayConfig {
    pub fn parse() -> Self {
        Parser::parse()
    }
}

/// Construction parameters for a [`crate::transport::Session`] and its
/// [`crate::queue::OutboundQueue`], assembled by the embedding
/// application (spec §6, §4.4, §4.5).
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub relay_url: String,
    pub document_id: String,
    pub retention: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ReplicaConfig {
    pub fn new(relay_url: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            document_id: document_id.into(),
            retention: crate::queue::DEFAULT_RETENTION,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}
