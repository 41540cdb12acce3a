// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A transport that reports over HTTP, through the agent or directly to the intake.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use super::{
    engine::{EngineError, ExporterEngine, SubmitRequest, Timespec},
    AgentSettings, EndpointMode, Tag, Transport,
};
use crate::flush::Flush;

/// Default upload timeout.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Error creating an [`HttpTransport`]. Not retryable.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The agent settings ask for something profiling can't do.
    #[error("Unsupported agent configuration for profiling: custom {0} is currently unsupported.")]
    UnsupportedAgentConfiguration(&'static str),
    /// The engine refused to create the exporter.
    #[error("Failed to initialize profiling exporter: {0}")]
    ExporterCreation(#[source] EngineError),
}

/// Settings for an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How to reach the agent.
    pub agent_settings: AgentSettings,
    /// Site for agentless mode.
    pub site: Option<String>,
    /// API key for agentless mode.
    pub api_key: Option<String>,
    /// Tags attached to every profile, in order.
    pub tags: Vec<Tag>,
    /// How long an upload may take.
    pub upload_timeout: Duration,
    /// Whether agentless mode may be used at all. Without this, `site` and
    /// `api_key` are ignored and profiles always go through the agent.
    pub agentless_allowed: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            agent_settings: AgentSettings::default(),
            site: None,
            api_key: None,
            tags: vec![],
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            agentless_allowed: false,
        }
    }
}

impl TransportConfig {
    fn endpoint_mode(self) -> EndpointMode {
        let TransportConfig {
            agent_settings,
            site,
            api_key,
            tags,
            agentless_allowed,
            ..
        } = self;
        match (non_empty(site), non_empty(api_key)) {
            (Some(site), Some(api_key)) if agentless_allowed => EndpointMode::Agentless {
                site,
                api_key,
                tags,
            },
            _ => EndpointMode::AgentRelay {
                base_url: agent_settings.base_url(),
                tags,
            },
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Builds an [`HttpTransport`] from a [`TransportConfig`], field by field.
///
/// The engine is only given at the end, to [`HttpTransportBuilder::build`].
#[derive(Debug, Default)]
pub struct HttpTransportBuilder {
    config: TransportConfig,
}

impl HttpTransportBuilder {
    /// Sets the agent settings.
    pub fn with_agent_settings(mut self, s: AgentSettings) -> HttpTransportBuilder {
        self.config.agent_settings = s;
        self
    }

    /// Sets the site used in agentless mode.
    pub fn with_site(mut self, s: impl Into<String>) -> HttpTransportBuilder {
        self.config.site = Some(s.into());
        self
    }

    /// Sets the API key used in agentless mode.
    pub fn with_api_key(mut self, k: impl Into<String>) -> HttpTransportBuilder {
        self.config.api_key = Some(k.into());
        self
    }

    /// Adds a tag.
    pub fn with_tag(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> HttpTransportBuilder {
        self.config.tags.push(Tag::new(name, value));
        self
    }

    /// Sets the upload timeout.
    pub fn with_upload_timeout(mut self, t: Duration) -> HttpTransportBuilder {
        self.config.upload_timeout = t;
        self
    }

    /// Allow agentless mode.
    pub fn with_agentless_allowed(mut self, a: bool) -> HttpTransportBuilder {
        self.config.agentless_allowed = a;
        self
    }

    /// Create the transport.
    pub fn build<E: ExporterEngine>(self, engine: E) -> Result<HttpTransport<E>, TransportError> {
        HttpTransport::new(engine, self.config)
    }
}

/// Reports flushes through an [`ExporterEngine`].
///
/// The transport creates one exporter when it is created, and uses it for
/// every export. Exports are serialized: the engine never sees two requests
/// on the same exporter at once.
pub struct HttpTransport<E: ExporterEngine> {
    engine: E,
    mode: EndpointMode,
    upload_timeout_ms: u64,
    exporter: tokio::sync::Mutex<E::Handle>,
}

impl<E: ExporterEngine> HttpTransport<E> {
    /// Create a transport.
    ///
    /// Agentless mode is used only if `site` and `api_key` are both set and
    /// `agentless_allowed` is true. Otherwise, profiles go through the agent.
    pub fn new(engine: E, config: TransportConfig) -> Result<Self, TransportError> {
        validate_agent_settings(&config.agent_settings)?;

        let upload_timeout_ms =
            u64::try_from(config.upload_timeout.as_millis()).unwrap_or(u64::MAX);
        let mode = config.endpoint_mode();
        let exporter = match &mode {
            EndpointMode::Agentless {
                site,
                api_key,
                tags,
            } => {
                tracing::info!(%site, "reporting profiles directly to the intake (agentless)");
                engine.create_agentless(site, api_key, tags)
            }
            EndpointMode::AgentRelay { base_url, tags } => {
                tracing::debug!(%base_url, "reporting profiles through the agent");
                engine.create_agent_relay(base_url, tags)
            }
        }
        .map_err(TransportError::ExporterCreation)?;

        Ok(HttpTransport {
            engine,
            mode,
            upload_timeout_ms,
            exporter: tokio::sync::Mutex::new(exporter),
        })
    }

    /// The endpoint this transport reports to.
    pub fn mode(&self) -> &EndpointMode {
        &self.mode
    }

    /// The upload timeout, in milliseconds.
    pub fn upload_timeout_ms(&self) -> u64 {
        self.upload_timeout_ms
    }
}

fn validate_agent_settings(agent_settings: &AgentSettings) -> Result<(), TransportError> {
    if agent_settings.transport_options.is_some() {
        return Err(TransportError::UnsupportedAgentConfiguration(
            "transport_options",
        ));
    }
    Ok(())
}

#[async_trait]
impl<E: ExporterEngine> Transport for HttpTransport<E> {
    async fn export(&self, flush: Flush) -> bool {
        let request = SubmitRequest {
            timeout_ms: self.upload_timeout_ms,
            start: Timespec::from(flush.start()),
            finish: Timespec::from(flush.finish()),
            pprof_file_name: flush.pprof_file_name(),
            pprof_data: flush.pprof_data(),
            code_provenance_file_name: flush.code_provenance_file_name(),
            code_provenance_data: flush.code_provenance_data(),
        };

        let result = {
            let mut exporter = self.exporter.lock().await;
            self.engine.submit(&mut *exporter, request).await
        };

        match result {
            Ok(status) if (200..300).contains(&status) => {
                tracing::debug!(status, "successfully reported profiling data");
                true
            }
            Ok(status) => {
                tracing::error!(
                    "failed to report profiling data: server returned unexpected HTTP {status} status code"
                );
                false
            }
            Err(err) => {
                tracing::error!("failed to report profiling data: {err}");
                false
            }
        }
    }
}

impl<E: ExporterEngine> fmt::Debug for HttpTransport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("mode", &self.mode)
            .field("upload_timeout_ms", &self.upload_timeout_ms)
            .finish()
    }
}
