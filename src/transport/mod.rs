// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Delivery of [`Flush`]es to the profile intake.

use std::{any::Any, fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::flush::Flush;

pub mod engine;
pub mod http;

/// Abstraction around delivering flushes.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    /// Deliver one flush. Returns whether the intake accepted it.
    ///
    /// Delivery failures are logged and reported as `false`, never as a panic
    /// or error: callers are expected to simply try again with the next flush.
    async fn export(&self, flush: Flush) -> bool;
}

/// A tag attached to every profile sent by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    /// Tag name, e.g. `service`.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Make a new tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// Custom low-level transport configuration shared with other exporters.
///
/// Profile transports never support it.
pub type TransportOptions = Arc<dyn Any + Send + Sync>;

/// How to reach the local agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Agent host name or IP.
    pub hostname: String,
    /// Agent port.
    pub port: u16,
    /// Whether to talk to the agent over TLS.
    pub ssl: bool,
    /// If set, reach the agent over this Unix domain socket instead of TCP.
    pub uds_path: Option<PathBuf>,
    /// Custom transport configuration. Rejected by [`http::HttpTransport`].
    pub transport_options: Option<TransportOptions>,
}

impl AgentSettings {
    /// Default agent host.
    pub const DEFAULT_HOSTNAME: &'static str = "127.0.0.1";
    /// Default agent port.
    pub const DEFAULT_PORT: u16 = 8126;

    /// The URL the agent is reachable at: `unix://<path>` when a socket path is
    /// set, `http(s)://host:port/` otherwise.
    pub fn base_url(&self) -> String {
        match &self.uds_path {
            Some(path) => format!("unix://{}", path.display()),
            None => {
                let scheme = if self.ssl { "https" } else { "http" };
                format!("{scheme}://{}:{}/", self.hostname, self.port)
            }
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            hostname: Self::DEFAULT_HOSTNAME.into(),
            port: Self::DEFAULT_PORT,
            ssl: false,
            uds_path: None,
            transport_options: None,
        }
    }
}

/// Where a transport sends its profiles. Decided once, when the transport is
/// created.
#[derive(Clone, PartialEq, Eq)]
pub enum EndpointMode {
    /// Through the local agent.
    AgentRelay {
        /// See [`AgentSettings::base_url`].
        base_url: String,
        /// Tags attached to every profile.
        tags: Vec<Tag>,
    },
    /// Directly to the intake of `site`.
    Agentless {
        /// The site, e.g. `datadoghq.com`.
        site: String,
        /// API key for the intake.
        api_key: String,
        /// Tags attached to every profile.
        tags: Vec<Tag>,
    },
}

impl EndpointMode {
    /// Tags attached to every profile.
    pub fn tags(&self) -> &[Tag] {
        match self {
            EndpointMode::AgentRelay { tags, .. } | EndpointMode::Agentless { tags, .. } => tags,
        }
    }
}

// keep the api key out of logs
impl fmt::Debug for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMode::AgentRelay { base_url, tags } => f
                .debug_struct("AgentRelay")
                .field("base_url", base_url)
                .field("tags", tags)
                .finish(),
            EndpointMode::Agentless { site, tags, .. } => f
                .debug_struct("Agentless")
                .field("site", site)
                .field("api_key", &"<redacted>")
                .field("tags", tags)
                .finish(),
        }
    }
}
