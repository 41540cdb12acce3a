// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Periodically flushes a [`Recorder`] and exports the result through a [`Transport`].

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::Notify;

use crate::{
    recorder::{Recorder, RecorderError},
    transport::Transport,
};

/// Default time between two flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Builds a [`Scheduler`], panicking if any required fields were not set by
/// the time `build` is called.
#[derive(Debug, Default)]
pub struct SchedulerBuilder {
    flush_interval: Option<Duration>,
    recorder: Option<Recorder>,
    transport: Option<Box<dyn Transport>>,
    final_flush: Option<bool>,
}

impl SchedulerBuilder {
    /// Sets the flush interval.
    pub fn with_flush_interval(mut self, i: Duration) -> SchedulerBuilder {
        self.flush_interval = Some(i);
        self
    }

    /// Sets the recorder.
    pub fn with_recorder(mut self, r: Recorder) -> SchedulerBuilder {
        self.recorder = Some(r);
        self
    }

    /// Sets the transport.
    pub fn with_transport(mut self, t: impl Transport + 'static) -> SchedulerBuilder {
        self.transport = Some(Box::new(t));
        self
    }

    /// Whether to flush one last time when stopped. Defaults to true.
    pub fn with_final_flush(mut self, f: bool) -> SchedulerBuilder {
        self.final_flush = Some(f);
        self
    }

    /// Turn this builder into a scheduler.
    pub fn build(self) -> Scheduler {
        Scheduler {
            flush_interval: self.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            recorder: self.recorder.expect("recorder is required"),
            transport: self.transport.expect("transport is required"),
            final_flush: self.final_flush.unwrap_or(true),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
enum TickError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Flushes and exports at a fixed interval, in a tokio task.
///
/// Flushes are exported one at a time, in the order they were recorded. A
/// failed export is logged and the profile dropped; the next flush goes out
/// on schedule.
#[derive(Debug)]
pub struct Scheduler {
    flush_interval: Duration,
    recorder: Recorder,
    transport: Box<dyn Transport>,
    final_flush: bool,
}

/// Handle to a running [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler, waiting for the final flush (if enabled) to be
    /// exported.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        self.stop.notify_one();
        self.task.await
    }

    /// Whether the scheduler task has finished, e.g. after a collector error.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Scheduler {
    /// See [`SchedulerBuilder`].
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Start flushing. The first flush happens one interval from now.
    pub fn spawn(self) -> SchedulerHandle {
        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(self.run(stop.clone()));
        SchedulerHandle { stop, task }
    }

    async fn run(mut self, stop: Arc<Notify>) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        // a slow export shifts the schedule instead of causing back-to-back flushes
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.flush_interval, "profile flush scheduler started");

        loop {
            let stopping = tokio::select! {
                _ = ticker.tick() => false,
                _ = stop.notified() => true,
            };
            if stopping && !self.final_flush {
                break;
            }
            tracing::debug!("flush timer woke up");

            if let Err(err) = scheduler_tick(&mut self.recorder, &*self.transport).await {
                tracing::error!(?err, "error during profiling, stopping");
                break;
            }
            if stopping {
                break;
            }
        }

        tracing::info!("profile flush scheduler finished");
    }
}

async fn scheduler_tick(
    recorder: &mut Recorder,
    transport: &dyn Transport,
) -> Result<(), TickError> {
    if recorder.is_empty() {
        tracing::debug!("no profiling data to flush");
        return Ok(());
    }

    let Some(flush) = recorder.flush()? else {
        return Ok(());
    };

    let (start, finish) = (flush.start(), flush.finish());
    if transport.export(flush).await {
        tracing::debug!(%start, %finish, "exported profile");
    } else {
        // don't stop on delivery errors
        tracing::warn!(%start, %finish, "failed to export profile, dropping it");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{self, AtomicBool, AtomicU32},
        Mutex,
    };

    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta};

    use super::*;
    use crate::{
        collector::{CollectorError, ProfileCollector, SerializedProfile},
        compression::gunzip,
        flush::Flush,
    };

    /// Produces back-to-back one minute windows, `pprof0`, `pprof1`...
    struct MockPprofCollector {
        counter: AtomicU32,
        idle: Arc<AtomicBool>,
        fail_at: Option<u32>,
    }

    impl MockPprofCollector {
        fn new() -> Self {
            MockPprofCollector {
                counter: AtomicU32::new(0),
                idle: Arc::new(AtomicBool::new(false)),
                fail_at: None,
            }
        }
    }

    impl ProfileCollector for MockPprofCollector {
        fn serialize(&mut self) -> Result<Option<SerializedProfile>, CollectorError> {
            let n = self.counter.fetch_add(1, atomic::Ordering::Relaxed);
            if self.fail_at == Some(n) {
                return Err("collector broke".into());
            }
            let base = DateTime::from_timestamp(1_650_000_000, 0).unwrap();
            Ok(Some(SerializedProfile {
                start: base + TimeDelta::seconds(60 * i64::from(n)),
                finish: base + TimeDelta::seconds(60 * i64::from(n + 1)),
                data: format!("pprof{n}").into_bytes(),
            }))
        }

        fn is_idle(&self) -> bool {
            self.idle.load(atomic::Ordering::Relaxed)
        }
    }

    /// Forwards the decompressed pprof of every export, and answers with the
    /// queued results (true when empty).
    struct MockTransport {
        tx: tokio::sync::mpsc::Sender<String>,
        results: Mutex<Vec<bool>>,
        first_export_delay: Mutex<Option<Duration>>,
    }

    impl std::fmt::Debug for MockTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockTransport").finish()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn export(&self, flush: Flush) -> bool {
            let pprof = String::from_utf8(gunzip(flush.pprof_data()).unwrap()).unwrap();
            self.tx.send(pprof).await.unwrap();
            let delay = self.first_export_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.results.lock().unwrap().pop().unwrap_or(true)
        }
    }

    fn make_scheduler(
        collector: MockPprofCollector,
        results: Vec<bool>,
        final_flush: bool,
    ) -> (Scheduler, tokio::sync::mpsc::Receiver<String>) {
        make_slow_scheduler(collector, results, final_flush, None)
    }

    fn make_slow_scheduler(
        collector: MockPprofCollector,
        results: Vec<bool>,
        final_flush: bool,
        first_export_delay: Option<Duration>,
    ) -> (Scheduler, tokio::sync::mpsc::Receiver<String>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let scheduler = Scheduler::builder()
            .with_flush_interval(Duration::from_secs(60))
            .with_recorder(Recorder::new(collector))
            .with_transport(MockTransport {
                tx,
                results: Mutex::new(results),
                first_export_delay: Mutex::new(first_export_delay),
            })
            .with_final_flush(final_flush)
            .build();
        (scheduler, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_exports_in_order() {
        let (scheduler, mut rx) = make_scheduler(MockPprofCollector::new(), vec![], true);
        let _handle = scheduler.spawn();
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
        assert_eq!(rx.recv().await.unwrap(), "pprof1");
        assert_eq!(rx.recv().await.unwrap(), "pprof2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_waits_one_interval() {
        let (scheduler, mut rx) = make_scheduler(MockPprofCollector::new(), vec![], true);
        let _handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_continues_after_failed_export() {
        // results are popped from the back: the first export fails
        let (scheduler, mut rx) =
            make_scheduler(MockPprofCollector::new(), vec![true, false], true);
        let handle = scheduler.spawn();
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
        assert_eq!(rx.recv().await.unwrap(), "pprof1");
        assert_eq!(rx.recv().await.unwrap(), "pprof2");
        assert!(!handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_skips_idle_recorder() {
        let collector = MockPprofCollector::new();
        let idle = collector.idle.clone();
        idle.store(true, atomic::Ordering::Relaxed);
        let (scheduler, mut rx) = make_scheduler(collector, vec![], true);
        let _handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_secs(60 * 5 + 1)).await;
        assert!(rx.try_recv().is_err());
        idle.store(false, atomic::Ordering::Relaxed);
        // the collector was never serialized while idle
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stops_on_collector_error() {
        let collector = MockPprofCollector {
            fail_at: Some(1),
            ..MockPprofCollector::new()
        };
        let (scheduler, mut rx) = make_scheduler(collector, vec![], true);
        let handle = scheduler.spawn();
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
        // the task ends and drops the transport, closing the channel
        assert!(rx.recv().await.is_none());
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_final_flush_on_stop() {
        let (scheduler, mut rx) = make_scheduler(MockPprofCollector::new(), vec![], true);
        let handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_stop_without_final_flush() {
        let (scheduler, mut rx) = make_scheduler(MockPprofCollector::new(), vec![], false);
        let handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_slow_export_delays_next_flush() {
        // the first export takes 2.5 intervals, missing two ticks
        let (scheduler, mut rx) = make_slow_scheduler(
            MockPprofCollector::new(),
            vec![],
            true,
            Some(Duration::from_secs(150)),
        );
        let _handle = scheduler.spawn();
        assert_eq!(rx.recv().await.unwrap(), "pprof0");
        assert_eq!(rx.recv().await.unwrap(), "pprof1");
        let after_slow_export = tokio::time::Instant::now();
        assert_eq!(rx.recv().await.unwrap(), "pprof2");
        // missed ticks are not replayed back to back
        assert!(after_slow_export.elapsed() >= Duration::from_secs(60));
    }
}
