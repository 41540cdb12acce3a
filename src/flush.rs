// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The immutable bundle handed from the [`Recorder`](crate::recorder::Recorder)
//! to a [`Transport`](crate::transport::Transport).

use chrono::{DateTime, Utc};
use thiserror::Error;

/// File name of the gzipped pprof payload, as expected by the intake.
pub const PPROF_FILE_NAME: &str = "rubyprofile.pprof.gz";

/// File name of the gzipped code provenance payload, as expected by the intake.
pub const CODE_PROVENANCE_FILE_NAME: &str = "code-provenance.json.gz";

/// Error building a [`Flush`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FlushError {
    /// The window ends before it starts.
    #[error("flush finishes at {finish} which is before its start {start}")]
    FinishBeforeStart {
        /// Start of the rejected window.
        start: DateTime<Utc>,
        /// End of the rejected window.
        finish: DateTime<Utc>,
    },
}

/// One completed, exportable profiling window.
///
/// A `Flush` carries two named payloads, both already compressed:
/// 1. the pprof profile, always present
/// 2. the code provenance document, absent when no code provenance collector
///    is configured (absent is different from empty: no part is sent at all)
///
/// A `Flush` is never mutated after construction. It is consumed by value by
/// [`Transport::export`](crate::transport::Transport::export).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    start: DateTime<Utc>,
    finish: DateTime<Utc>,
    pprof_file_name: String,
    pprof_data: Vec<u8>,
    code_provenance_file_name: String,
    code_provenance_data: Option<Vec<u8>>,
}

impl Flush {
    /// Create a new flush. Fails if `finish` is before `start`.
    pub fn new(
        start: DateTime<Utc>,
        finish: DateTime<Utc>,
        pprof_file_name: impl Into<String>,
        pprof_data: Vec<u8>,
        code_provenance_file_name: impl Into<String>,
        code_provenance_data: Option<Vec<u8>>,
    ) -> Result<Self, FlushError> {
        if finish < start {
            return Err(FlushError::FinishBeforeStart { start, finish });
        }
        Ok(Flush {
            start,
            finish,
            pprof_file_name: pprof_file_name.into(),
            pprof_data,
            code_provenance_file_name: code_provenance_file_name.into(),
            code_provenance_data,
        })
    }

    /// Start of the profiling window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the profiling window.
    pub fn finish(&self) -> DateTime<Utc> {
        self.finish
    }

    /// File name of the pprof payload.
    pub fn pprof_file_name(&self) -> &str {
        &self.pprof_file_name
    }

    /// Compressed pprof bytes.
    pub fn pprof_data(&self) -> &[u8] {
        &self.pprof_data
    }

    /// File name of the code provenance payload.
    pub fn code_provenance_file_name(&self) -> &str {
        &self.code_provenance_file_name
    }

    /// Compressed code provenance bytes, if any.
    pub fn code_provenance_data(&self) -> Option<&[u8]> {
        self.code_provenance_data.as_deref()
    }
}
