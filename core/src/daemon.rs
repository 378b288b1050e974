use crate::builder::{BuildReport, IndexBuilder};
use crate::error::{Error, Result};
use crate::index::InvertedIndex;
use crate::persist::IndexStore;
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// A committed index version. Queries hold on to one of these for their
/// whole lifetime, so they never see a batch half merged.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub index: Arc<InvertedIndex>,
}

/// Shared, versioned pointer to the latest committed index.
#[derive(Debug, Clone, Default)]
pub struct IndexHandle {
    inner: Arc<RwLock<IndexSnapshot>>,
}

impl IndexHandle {
    pub fn new(index: InvertedIndex) -> Self {
        Self { inner: Arc::new(RwLock::new(IndexSnapshot { generation: 0, index: Arc::new(index) })) }
    }

    pub fn snapshot(&self) -> IndexSnapshot { self.inner.read().clone() }

    pub fn generation(&self) -> u64 { self.inner.read().generation }

    /// Replace the current index; returns the new generation.
    pub fn publish(&self, index: InvertedIndex) -> u64 {
        let index = Arc::new(index);
        let mut current = self.inner.write();
        current.generation += 1;
        current.index = index;
        current.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Scanning,
    Building,
    Persisting,
    Stopped,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Building => "building",
            Self::Persisting => "persisting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub build: BuildReport,
    pub persisted: bool,
    /// Index generation visible to queries after this tick.
    pub generation: u64,
    /// Set when the documents folder could not be listed; the tick did nothing.
    pub scan_error: Option<String>,
}

/// One indexing pass at a time over a documents folder.
///
/// Owns the working index exclusively. Every `Err` from [`CrawlerDaemon::tick`]
/// is a store failure (load or save) or a worker pool that could not be
/// started; an unreadable documents folder is logged and reported in
/// [`TickReport::scan_error`] instead.
pub struct CrawlerDaemon {
    documents_dir: PathBuf,
    builder: IndexBuilder,
    store: Arc<IndexStore>,
    handle: IndexHandle,
    index: Option<InvertedIndex>,
    state: Arc<Mutex<DaemonState>>,
}

impl CrawlerDaemon {
    pub fn new(documents_dir: impl Into<PathBuf>, builder: IndexBuilder, store: Arc<IndexStore>, handle: IndexHandle) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            builder,
            store,
            handle,
            index: None,
            state: Arc::new(Mutex::new(DaemonState::Idle)),
        }
    }

    pub fn documents_dir(&self) -> &Path { &self.documents_dir }

    pub fn state(&self) -> DaemonState { *self.state.lock() }

    pub fn handle(&self) -> &IndexHandle { &self.handle }

    fn set_state(&self, state: DaemonState) { *self.state.lock() = state; }

    /// Load the persisted index on first use and publish it to readers.
    pub fn load(&mut self) -> Result<()> {
        if self.index.is_none() {
            let index = self.store.load()?;
            self.handle.publish(index.clone());
            self.index = Some(index);
        }
        Ok(())
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        self.load()?;
        let Some(index) = self.index.as_ref() else {
            return Ok(TickReport::default());
        };
        let mut report = TickReport { generation: self.handle.generation(), ..TickReport::default() };

        self.set_state(DaemonState::Scanning);
        let pending = match self.builder.scan(&self.documents_dir, index) {
            Ok(pending) => pending,
            Err(err) => {
                error!(folder = %self.documents_dir.display(), error = %err, "could not scan documents folder");
                self.set_state(DaemonState::Idle);
                report.scan_error = Some(err.to_string());
                return Ok(report);
            }
        };
        if pending.is_empty() {
            self.set_state(DaemonState::Idle);
            return Ok(report);
        }

        self.set_state(DaemonState::Building);
        let batch = match self.builder.extract(pending) {
            Ok(batch) => batch,
            Err(err) => {
                self.set_state(DaemonState::Idle);
                return Err(err);
            }
        };
        if !batch.report().changed() {
            report.build = batch.into_report();
            self.set_state(DaemonState::Idle);
            return Ok(report);
        }

        self.set_state(DaemonState::Persisting);
        let mut next = index.clone();
        report.build = batch.merge_into(&mut next);
        if let Err(err) = self.store.save(&next) {
            self.set_state(DaemonState::Idle);
            return Err(err);
        }
        report.generation = self.handle.publish(next.clone());
        report.persisted = true;
        self.index = Some(next);
        self.set_state(DaemonState::Idle);

        info!(
            indexed = report.build.indexed.len(),
            failed = report.build.failed.len() + report.build.timed_out.len(),
            generation = report.generation,
            "index batch committed"
        );
        Ok(report)
    }
}

/// Runs a [`CrawlerDaemon`] on a background thread at a fixed interval.
///
/// Construction does nothing; [`IndexingService::start`] loads the index and
/// spawns the loop, [`IndexingService::stop`] lets any in-flight pass finish
/// and then joins the thread.
pub struct IndexingService {
    daemon: Option<CrawlerDaemon>,
    interval: Duration,
    handle: IndexHandle,
    state: Arc<Mutex<DaemonState>>,
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl IndexingService {
    pub fn new(daemon: CrawlerDaemon, interval: Duration) -> Self {
        let handle = daemon.handle.clone();
        let state = Arc::clone(&daemon.state);
        Self {
            daemon: Some(daemon),
            interval,
            handle,
            state,
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: None,
        }
    }

    pub fn handle(&self) -> IndexHandle { self.handle.clone() }

    pub fn state(&self) -> DaemonState { *self.state.lock() }

    pub fn is_running(&self) -> bool { self.worker.as_ref().is_some_and(|w| !w.is_finished()) }

    /// Load the index (failing fast on a corrupt one) and start ticking.
    pub fn start(&mut self) -> Result<()> {
        let mut daemon = self
            .daemon
            .take()
            .ok_or_else(|| Error::Config("indexing service was already started".to_string()))?;
        if let Err(err) = daemon.load() {
            self.daemon = Some(daemon);
            return Err(err);
        }
        *self.stop.0.lock() = false;

        let stop = Arc::clone(&self.stop);
        let state = Arc::clone(&self.state);
        let interval = self.interval;
        info!(folder = %daemon.documents_dir().display(), interval_s = interval.as_secs_f64(), "starting indexing service");

        let worker = thread::Builder::new().name("indexing-service".to_string()).spawn(move || {
            let outcome = run_loop(&mut daemon, interval, &stop);
            *state.lock() = DaemonState::Stopped;
            outcome
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop scheduling ticks and wait for the loop to exit. Returns the
    /// store error that ended the loop, if any.
    pub fn stop(&mut self) -> Result<()> {
        {
            let (flag, cvar) = &*self.stop;
            *flag.lock() = true;
            cvar.notify_all();
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let outcome = worker
            .join()
            .map_err(|_| Error::Io(std::io::Error::other("indexing thread panicked")))?;
        info!("indexing service stopped");
        outcome
    }
}

impl Drop for IndexingService {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(err) = self.stop() {
                error!(error = %err, "indexing service ended with an error");
            }
        }
    }
}

fn run_loop(daemon: &mut CrawlerDaemon, interval: Duration, stop: &(Mutex<bool>, Condvar)) -> Result<()> {
    let (flag, cvar) = stop;
    loop {
        if *flag.lock() {
            return Ok(());
        }
        if let Err(err) = daemon.tick() {
            error!(error = %err, "indexing pass failed, stopping indexing service");
            return Err(err);
        }

        let deadline = Instant::now() + interval;
        let mut stopped = flag.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        if *stopped {
            return Ok(());
        }
    }
}
