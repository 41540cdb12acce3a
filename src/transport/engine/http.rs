// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! An [`ExporterEngine`] that uploads with [`reqwest`], as a multipart form.
//!
//! The form has the fields `version` (`3`), `start` and `end` (RFC 3339),
//! `family`, one `tags[]` per tag (`name:value`), and one file part per
//! payload named `data[<file name>]`.

use std::{fmt, path::PathBuf, time::Duration};

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{
    multipart::{Form, Part},
    Url,
};

use super::{EngineError, ExporterEngine, SubmitRequest, Timespec};
use crate::transport::Tag;

const AGENT_INTAKE_PATH: &str = "profiling/v1/input";
// requests over a unix socket still need an authority
const UNIX_SOCKET_BASE_URL: &str = "http://localhost/";
const API_KEY_HEADER: &str = "DD-API-KEY";

/// An [`ExporterEngine`] that talks HTTP(S), over TCP or, for agents reached
/// through a `unix://` base URL, over a Unix domain socket.
#[derive(Debug, Clone)]
pub struct HttpExporterEngine {
    client: reqwest::Client,
    family: String,
    agentless_intake: Option<Url>,
}

impl HttpExporterEngine {
    /// Make an engine that reports profiles of the given language family.
    pub fn new(family: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), family)
    }

    /// Make an engine that sends requests with `client`.
    pub fn with_client(client: reqwest::Client, family: impl Into<String>) -> Self {
        HttpExporterEngine {
            client,
            family: family.into(),
            agentless_intake: None,
        }
    }

    /// Send agentless uploads to `url` instead of `https://intake.profile.<site>/v1/input`.
    pub fn with_agentless_intake(mut self, url: Url) -> Self {
        self.agentless_intake = Some(url);
        self
    }
}

/// An exporter created by [`HttpExporterEngine`].
pub struct HttpExporter {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    tags: Vec<Tag>,
}

impl HttpExporter {
    /// Where profiles are sent.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl fmt::Debug for HttpExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExporter")
            .field("endpoint", &self.endpoint.as_str())
            .field("tags", &self.tags)
            .finish()
    }
}

fn rfc3339(time: Timespec) -> Result<String, EngineError> {
    time.to_datetime()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .ok_or_else(|| EngineError::new(format!("timestamp out of range: {time:?}")))
}

fn add_file(form: Form, file_name: &str, data: &[u8]) -> Form {
    let part = Part::bytes(data.to_vec()).file_name(file_name.to_owned());
    form.part(format!("data[{file_name}]"), part)
}

#[cfg(unix)]
fn unix_socket_client(path: PathBuf) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .unix_socket(path)
        .no_proxy()
        .build()
        .map_err(|e| EngineError::new(error_chain(&e)))
}

#[cfg(not(unix))]
fn unix_socket_client(_path: PathBuf) -> Result<reqwest::Client, EngineError> {
    Err(EngineError::new(
        "unix domain sockets are not supported on this platform",
    ))
}

// reqwest hides the interesting part (e.g. "Connection refused") in the sources
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

#[async_trait]
impl ExporterEngine for HttpExporterEngine {
    type Handle = HttpExporter;

    fn create_agentless(
        &self,
        site: &str,
        api_key: &str,
        tags: &[Tag],
    ) -> Result<HttpExporter, EngineError> {
        if api_key.is_empty() {
            return Err(EngineError::new("agentless mode requires an API key"));
        }
        let endpoint = match &self.agentless_intake {
            Some(url) => url.clone(),
            None => Url::parse(&format!("https://intake.profile.{site}/v1/input"))
                .map_err(|e| EngineError::new(format!("invalid site {site:?}: {e}")))?,
        };
        Ok(HttpExporter {
            client: self.client.clone(),
            endpoint,
            api_key: Some(api_key.to_owned()),
            tags: tags.to_vec(),
        })
    }

    fn create_agent_relay(
        &self,
        base_url: &str,
        tags: &[Tag],
    ) -> Result<HttpExporter, EngineError> {
        let (client, base_url) = match base_url.strip_prefix("unix://") {
            Some("") => return Err(EngineError::new("empty unix domain socket path")),
            Some(path) => (
                unix_socket_client(PathBuf::from(path))?,
                Url::parse(UNIX_SOCKET_BASE_URL).map_err(|e| EngineError::new(e.to_string()))?,
            ),
            None => {
                let url = Url::parse(base_url).map_err(|e| {
                    EngineError::new(format!("invalid agent URL {base_url:?}: {e}"))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(EngineError::new(format!(
                        "unsupported agent URL scheme {:?}",
                        url.scheme()
                    )));
                }
                (self.client.clone(), url)
            }
        };
        let endpoint = base_url
            .join(AGENT_INTAKE_PATH)
            .map_err(|e| EngineError::new(e.to_string()))?;
        Ok(HttpExporter {
            client,
            endpoint,
            api_key: None,
            tags: tags.to_vec(),
        })
    }

    async fn submit(
        &self,
        handle: &mut HttpExporter,
        request: SubmitRequest<'_>,
    ) -> Result<u16, EngineError> {
        let mut form = Form::new()
            .text("version", "3")
            .text("start", rfc3339(request.start)?)
            .text("end", rfc3339(request.finish)?)
            .text("family", self.family.clone());
        for tag in &handle.tags {
            form = form.text("tags[]", tag.to_string());
        }
        form = add_file(form, request.pprof_file_name, request.pprof_data);
        if let Some(data) = request.code_provenance_data {
            form = add_file(form, request.code_provenance_file_name, data);
        }

        let mut builder = handle
            .client
            .post(handle.endpoint.clone())
            .timeout(Duration::from_millis(request.timeout_ms))
            .multipart(form);
        if let Some(api_key) = &handle.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        tracing::debug!(endpoint = %handle.endpoint, "uploading profile");
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::new(error_chain(&e)))?;
        Ok(response.status().as_u16())
    }
}
