// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decides whether collected data is worth reporting, and packs it into a [`Flush`].

use std::{fmt, io, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    collector::{CodeProvenanceCollector, CollectorError, ProfileCollector},
    compression::{Compressor, GzipCompressor},
    flush::{Flush, FlushError, CODE_PROVENANCE_FILE_NAME, PPROF_FILE_NAME},
};

/// Profiles shorter than this are not reported by default.
pub const PROFILE_DURATION_THRESHOLD: Duration = Duration::from_secs(1);

/// Error producing a flush. All of these are fatal for the recorder.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecorderError {
    /// The pprof collector failed to serialize.
    #[error("pprof collector: {0}")]
    PprofCollector(CollectorError),
    /// The code provenance collector failed to refresh or serialize.
    #[error("code provenance collector: {0}")]
    CodeProvenance(CollectorError),
    /// A payload could not be compressed.
    #[error("compressing {file_name}: {source}")]
    Compression {
        /// The payload being compressed.
        file_name: &'static str,
        /// The underlying error.
        source: io::Error,
    },
    /// The collector reported an invalid window.
    #[error(transparent)]
    InvalidFlush(#[from] FlushError),
}

/// Builds a [`Recorder`], panicking if the pprof collector was not set by the
/// time `build` is called. Most users should be using [`Recorder::new`].
#[derive(Default)]
pub struct RecorderBuilder {
    pprof_collector: Option<Box<dyn ProfileCollector>>,
    code_provenance_collector: Option<Box<dyn CodeProvenanceCollector>>,
    minimum_duration: Option<Duration>,
    compressor: Option<Box<dyn Compressor>>,
}

impl RecorderBuilder {
    /// Sets the pprof collector.
    pub fn with_pprof_collector(mut self, c: impl ProfileCollector + 'static) -> RecorderBuilder {
        self.pprof_collector = Some(Box::new(c));
        self
    }

    /// Sets the code provenance collector. Without one, flushes carry no code
    /// provenance payload.
    pub fn with_code_provenance(
        mut self,
        c: impl CodeProvenanceCollector + 'static,
    ) -> RecorderBuilder {
        self.code_provenance_collector = Some(Box::new(c));
        self
    }

    /// Sets the minimum duration of a reported profile.
    pub fn with_minimum_duration(mut self, d: Duration) -> RecorderBuilder {
        self.minimum_duration = Some(d);
        self
    }

    /// Sets the compressor. Defaults to gzip.
    pub fn with_compressor(mut self, c: impl Compressor + 'static) -> RecorderBuilder {
        self.compressor = Some(Box::new(c));
        self
    }

    /// Turn this builder into a recorder.
    pub fn build(self) -> Recorder {
        Recorder {
            pprof_collector: self.pprof_collector.expect("pprof collector is required"),
            code_provenance_collector: self.code_provenance_collector,
            minimum_duration: self.minimum_duration.unwrap_or(PROFILE_DURATION_THRESHOLD),
            compressor: self
                .compressor
                .unwrap_or_else(|| Box::new(GzipCompressor::default())),
        }
    }
}

/// Records the data gathered by the collectors into a [`Flush`].
///
/// The pprof collector is special: its window and its idleness decide if and
/// what gets flushed. The code provenance collector only adds metadata.
pub struct Recorder {
    pprof_collector: Box<dyn ProfileCollector>,
    code_provenance_collector: Option<Box<dyn CodeProvenanceCollector>>,
    minimum_duration: Duration,
    compressor: Box<dyn Compressor>,
}

impl Recorder {
    /// A recorder with no code provenance, the default threshold, and gzip.
    pub fn new(pprof_collector: impl ProfileCollector + 'static) -> Self {
        Self::builder().with_pprof_collector(pprof_collector).build()
    }

    /// See [`RecorderBuilder`].
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::default()
    }

    /// Pull the current data out of the collectors.
    ///
    /// Returns `Ok(None)` if there is no data, or if the profile is shorter
    /// than the minimum duration.
    pub fn flush(&mut self) -> Result<Option<Flush>, RecorderError> {
        let Some(profile) = self
            .pprof_collector
            .serialize()
            .map_err(RecorderError::PprofCollector)?
        else {
            return Ok(None);
        };

        if self.duration_below_threshold(profile.start, profile.finish) {
            tracing::debug!("Skipped exporting profiling events as profile duration is below minimum");
            return Ok(None);
        }

        let code_provenance = match &mut self.code_provenance_collector {
            Some(collector) => {
                collector.refresh().map_err(RecorderError::CodeProvenance)?;
                Some(
                    collector
                        .serialize_json()
                        .map_err(RecorderError::CodeProvenance)?,
                )
            }
            None => None,
        };

        let pprof_data = self.compress(PPROF_FILE_NAME, &profile.data)?;
        let code_provenance_data = code_provenance
            .map(|json| self.compress(CODE_PROVENANCE_FILE_NAME, &json))
            .transpose()?;

        Ok(Some(Flush::new(
            profile.start,
            profile.finish,
            PPROF_FILE_NAME,
            pprof_data,
            CODE_PROVENANCE_FILE_NAME,
            code_provenance_data,
        )?))
    }

    /// Whether there is nothing to flush, as reported by the pprof collector.
    pub fn is_empty(&self) -> bool {
        self.pprof_collector.is_idle()
    }

    fn duration_below_threshold(&self, start: DateTime<Utc>, finish: DateTime<Utc>) -> bool {
        match (finish - start).to_std() {
            Ok(duration) => duration < self.minimum_duration,
            // negative
            Err(_) => true,
        }
    }

    fn compress(&self, file_name: &'static str, data: &[u8]) -> Result<Vec<u8>, RecorderError> {
        self.compressor
            .compress(data)
            .map_err(|source| RecorderError::Compression { file_name, source })
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("minimum_duration", &self.minimum_duration)
            .field(
                "code_provenance",
                &self.code_provenance_collector.is_some(),
            )
            .field("compressor", &self.compressor)
            .finish()
    }
}
