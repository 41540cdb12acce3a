// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Profile flush exporter
//! Packs periodically-sampled profiling data into compressed, timestamped bundles
//! and uploads them to the profile intake, either through the local agent or
//! directly ("agentless").
//!
//! ### Usage
//!
//! The pipeline has three parts:
//! 1. a [`Recorder`] pulls the data out of your [`ProfileCollector`] (and
//!    optionally a [`CodeProvenanceCollector`]), drops profiles shorter than a
//!    minimum duration, and gzips the rest into a [`Flush`].
//! 2. a [`Transport`] delivers the flush. [`HttpTransport`] picks agent or
//!    agentless mode once, when it is created, and performs the upload through
//!    an [`ExporterEngine`].
//! 3. a [`Scheduler`] runs the two at a fixed interval in a tokio task.
//!
#![cfg_attr(feature = "http-engine", doc = "```no_run")]
#![cfg_attr(not(feature = "http-engine"), doc = "```compile_fail")]
//! # use profile_flush_exporter::collector::{CollectorError, ProfileCollector, SerializedProfile};
//! # use profile_flush_exporter::recorder::Recorder;
//! # use profile_flush_exporter::scheduler::Scheduler;
//! # use profile_flush_exporter::transport::engine::http::HttpExporterEngine;
//! # use profile_flush_exporter::transport::http::HttpTransportBuilder;
//! # struct MyCollector;
//! # impl ProfileCollector for MyCollector {
//! #     fn serialize(&mut self) -> Result<Option<SerializedProfile>, CollectorError> { Ok(None) }
//! #     fn is_idle(&self) -> bool { true }
//! # }
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransportBuilder::default()
//!     .with_tag("service", "my-service")
//!     .build(HttpExporterEngine::new("rust"))?;
//!
//! let scheduler = Scheduler::builder()
//!     .with_recorder(Recorder::new(MyCollector))
//!     .with_transport(transport)
//!     .build()
//!     .spawn();
//! # scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Delivery modes
//!
//! Profiles go directly to `https://intake.profile.<site>/v1/input` only when a
//! site and an API key are both configured *and* agentless mode is explicitly
//! allowed (see [`TransportConfig::agentless_allowed`]). In every other case
//! they go through the agent described by [`AgentSettings`], over HTTP, HTTPS,
//! or a Unix domain socket (`unix://<path>`).
//!
//! Delivery failures (network errors, non-2xx responses) are logged with
//! [`tracing`] and reported as `false`; they never panic or stop the scheduler.
//!
//! [`Recorder`]: recorder::Recorder
//! [`ProfileCollector`]: collector::ProfileCollector
//! [`CodeProvenanceCollector`]: collector::CodeProvenanceCollector
//! [`Flush`]: flush::Flush
//! [`Transport`]: transport::Transport
//! [`HttpTransport`]: transport::http::HttpTransport
//! [`ExporterEngine`]: transport::engine::ExporterEngine
//! [`Scheduler`]: scheduler::Scheduler
//! [`TransportConfig::agentless_allowed`]: transport::http::TransportConfig::agentless_allowed
//! [`AgentSettings`]: transport::AgentSettings

pub mod collector;
pub mod compression;
pub mod flush;
pub mod recorder;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod test_util;
