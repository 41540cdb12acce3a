// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collectors the [`Recorder`](crate::recorder::Recorder) pulls data out of.
//!
//! How samples are captured and how the pprof bytes are built is up to the
//! implementor of [`ProfileCollector`]. This crate ships one
//! [`CodeProvenanceCollector`], [`code_provenance::ProcMapsCodeProvenance`].

use chrono::{DateTime, Utc};

pub mod code_provenance;

/// Error returned by a collector.
pub type CollectorError = Box<dyn std::error::Error + Send + Sync>;

/// A serialized, uncompressed profile together with the window it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedProfile {
    /// Start of the window.
    pub start: DateTime<Utc>,
    /// End of the window.
    pub finish: DateTime<Utc>,
    /// Raw pprof bytes.
    pub data: Vec<u8>,
}

/// The collector that produces the pprof data.
///
/// Its window defines the window of every flush.
pub trait ProfileCollector: Send {
    /// Serialize the current state and start a new window. Returns `None` if
    /// there is nothing to report.
    fn serialize(&mut self) -> Result<Option<SerializedProfile>, CollectorError>;

    /// Whether the collector has gathered nothing since the last serialize.
    fn is_idle(&self) -> bool;
}

/// The optional collector describing where the profiled code comes from.
pub trait CodeProvenanceCollector: Send {
    /// Refresh the view of loaded code.
    fn refresh(&mut self) -> Result<(), CollectorError>;

    /// Render the current view as JSON.
    fn serialize_json(&self) -> Result<Vec<u8>, CollectorError>;
}
