// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The exporter engine performs the actual upload. The transport only decides
//! which endpoint to use and how to read the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::Tag;

#[cfg(feature = "http-engine")]
#[cfg_attr(docsrs, doc(cfg(feature = "http-engine")))]
pub mod http;

/// Error reported by an engine, either when creating an exporter or when
/// sending a request (DNS, connect, timeout...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    /// Make an engine error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        EngineError(message.into())
    }
}

/// A point in time split as POSIX `struct timespec` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    /// Whole seconds since the Unix epoch.
    pub seconds: i64,
    /// Nanoseconds past `seconds`.
    pub nanoseconds: u32,
}

impl From<DateTime<Utc>> for Timespec {
    fn from(time: DateTime<Utc>) -> Self {
        Timespec {
            seconds: time.timestamp(),
            nanoseconds: time.timestamp_subsec_nanos(),
        }
    }
}

impl Timespec {
    /// Back to a [`DateTime`], if in range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

/// Everything an engine needs to upload one flush.
#[derive(Debug, Clone, Copy)]
pub struct SubmitRequest<'a> {
    /// Give up after this many milliseconds.
    pub timeout_ms: u64,
    /// Start of the profile.
    pub start: Timespec,
    /// End of the profile.
    pub finish: Timespec,
    /// File name of the pprof part.
    pub pprof_file_name: &'a str,
    /// Contents of the pprof part.
    pub pprof_data: &'a [u8],
    /// File name of the code provenance part.
    pub code_provenance_file_name: &'a str,
    /// Contents of the code provenance part. `None` means no part is sent.
    pub code_provenance_data: Option<&'a [u8]>,
}

/// The capability that creates exporters and sends requests with them.
///
/// An exporter ([`ExporterEngine::Handle`]) is expensive to create and is
/// reused for every request. It is never used by two requests at once.
#[async_trait]
pub trait ExporterEngine: Send + Sync + 'static {
    /// An exporter bound to one endpoint and set of tags.
    type Handle: Send + 'static;

    /// Create an exporter that sends straight to the intake of `site`.
    fn create_agentless(
        &self,
        site: &str,
        api_key: &str,
        tags: &[Tag],
    ) -> Result<Self::Handle, EngineError>;

    /// Create an exporter that sends through the agent at `base_url`.
    fn create_agent_relay(&self, base_url: &str, tags: &[Tag])
        -> Result<Self::Handle, EngineError>;

    /// Send a request. Returns the HTTP status code of the response.
    async fn submit(
        &self,
        handle: &mut Self::Handle,
        request: SubmitRequest<'_>,
    ) -> Result<u16, EngineError>;
}
