//! Directory watcher implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, select};
use dirmirror_utils_ordered_set::OrderedSet;
use tracing::{debug, info, trace, warn};

use crate::config::{DesyncPolicy, WatcherConfig};
use crate::decode;
use crate::error::{Result, WatcherError};
use crate::event::ChangeEntry;
use crate::mirror::Mirror;
use crate::notify_source::NotifySource;
use crate::path::PathKey;
use crate::source::{ChangeSource, ReadOutcome};

/// Phase of a watch, as observed through a [`WatchHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WatchState {
    /// Constructed, not started yet.
    Idle = 0,

    /// Listing the directory.
    Scanning = 1,

    /// Waiting for the change source or a stop request.
    Waiting = 2,

    /// Pairing raw records.
    Decoding = 3,

    /// Updating the mirror.
    Applying = 4,

    /// Running the callback.
    Notifying = 5,

    /// The watch ended. Terminal.
    Stopped = 6,
}

impl WatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Scanning,
            2 => Self::Waiting,
            3 => Self::Decoding,
            4 => Self::Applying,
            5 => Self::Notifying,
            _ => Self::Stopped,
        }
    }
}

/// Cross-thread control over a single watch.
///
/// Cloning is cheap. Stopping is idempotent and may happen before the watch
/// starts, in which case it ends without delivering anything.
#[derive(Clone)]
pub struct WatchHandle {
    inner: Arc<Signal>,
}

struct Signal {
    requested: AtomicBool,
    state: AtomicU8,
    wake: Sender<()>,
}

impl WatchHandle {
    fn new() -> (Self, Receiver<()>) {
        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let handle = Self {
            inner: Arc::new(Signal {
                requested: AtomicBool::new(false),
                state: AtomicU8::new(WatchState::Idle as u8),
                wake,
            }),
        };
        (handle, wake_rx)
    }

    /// Ask the watch to end. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            // Only the first request wakes the loop.
            let _ = self.inner.wake.try_send(());
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Current phase of the watch.
    pub fn state(&self) -> WatchState {
        WatchState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WatchState) {
        trace!("Watch state: {state:?}");
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("state", &self.state())
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

enum Wait {
    Ready(ReadOutcome),
    TimedOut,
    Stopped,
}

/// Watches the direct entries of one directory and reports positional
/// changes against an in-memory mirror.
///
/// A watcher runs once: [`start_watch`](Self::start_watch) blocks the calling
/// thread until a stop is requested or the watch fails, after which the
/// watcher is terminal.
pub struct DirectoryWatcher<S = NotifySource> {
    /// Directory being watched, as given.
    path: PathBuf,

    /// Tunables.
    config: WatcherConfig,

    /// Where raw records come from.
    source: S,

    /// What the consumer is believed to hold.
    mirror: Mirror,

    /// Changes of the batch being built.
    batch: Vec<ChangeEntry>,

    /// Stop flag and published state.
    handle: WatchHandle,

    /// Wakes the loop on the first stop request.
    stop_rx: Receiver<()>,
}

impl DirectoryWatcher<NotifySource> {
    /// Create a watcher for `path` with the default configuration.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(path, WatcherConfig::default())
    }

    /// Create a watcher for `path` backed by the platform's notify facility.
    pub fn with_config(path: impl Into<PathBuf>, config: WatcherConfig) -> Result<Self> {
        let path = path.into();
        config.validate()?;
        ensure_directory(&path)?;
        let source = NotifySource::open(&path, config.buffer_size)?;
        Ok(Self::assemble(path, config, source))
    }
}

impl<S: ChangeSource> DirectoryWatcher<S> {
    /// Create a watcher for `path` fed by a custom change source.
    pub fn with_source(path: impl Into<PathBuf>, config: WatcherConfig, source: S) -> Result<Self> {
        let path = path.into();
        config.validate()?;
        ensure_directory(&path)?;
        Ok(Self::assemble(path, config, source))
    }

    fn assemble(path: PathBuf, config: WatcherConfig, source: S) -> Self {
        let (handle, stop_rx) = WatchHandle::new();
        Self {
            path,
            config,
            source,
            mirror: Mirror::new(),
            batch: Vec::new(),
            handle,
            stop_rx,
        }
    }

    /// The watched directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active configuration.
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// A handle that can stop this watch from another thread.
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Current phase of the watch.
    pub fn state(&self) -> WatchState {
        self.handle.state()
    }

    /// The entries the watcher currently tracks, in index order.
    pub fn mirror(&self) -> &OrderedSet<PathKey> {
        self.mirror.files()
    }

    /// Request the watch to end. Idempotent.
    pub fn stop_watch(&self) {
        self.handle.stop();
    }

    /// Watch the directory, calling `callback` with each batch of changes.
    ///
    /// The first call always receives the full listing as adds, even when the
    /// directory is empty. Later calls receive only non-empty batches. Blocks
    /// until a stop is requested or an error occurs; a stop that arrives while
    /// a batch is in flight suppresses that batch.
    ///
    /// A stop requested before this call is latched: the watch returns
    /// `Ok(())` right away without scanning or delivering the initial
    /// listing. A [`WatcherWorker`](crate::WatcherWorker) relies on this when
    /// `run` replaces a watch that has not started yet.
    ///
    /// Returns [`WatcherError::Terminated`] if this watcher already ran.
    pub fn start_watch<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[ChangeEntry]),
    {
        if self.handle.state() != WatchState::Idle {
            return Err(WatcherError::Terminated);
        }

        info!("Watching directory: {}", self.path.display());
        let result = self.run(&mut callback);
        self.handle.set_state(WatchState::Stopped);
        while self.stop_rx.try_recv().is_ok() {}

        match &result {
            Ok(()) => info!("Stopped watching: {}", self.path.display()),
            Err(e) => warn!("Watch of {} failed: {e}", self.path.display()),
        }
        result
    }

    fn run<F>(&mut self, callback: &mut F) -> Result<()>
    where
        F: FnMut(&[ChangeEntry]),
    {
        if self.handle.is_stop_requested() {
            debug!("Stop requested before the watch started");
            return Ok(());
        }

        self.handle.set_state(WatchState::Scanning);
        self.source.start()?;
        self.batch.clear();
        self.resync()?;
        self.handle.set_state(WatchState::Notifying);
        callback(&self.batch);

        while !self.handle.is_stop_requested() {
            self.handle.set_state(WatchState::Waiting);
            let outcome = match self.wait(None)? {
                Wait::Ready(outcome) => outcome,
                Wait::TimedOut => continue,
                Wait::Stopped => break,
            };

            self.batch.clear();
            if !self.process(outcome)? || self.handle.is_stop_requested() {
                break;
            }
            if self.batch.is_empty() {
                trace!("Batch produced no changes");
                continue;
            }

            self.handle.set_state(WatchState::Notifying);
            debug!("Delivering {} changes", self.batch.len());
            callback(&self.batch);
        }
        Ok(())
    }

    /// Wait for the next outcome, a stop request, or the timeout.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Wait> {
        let pending = self.source.request_next()?;
        let stop = self.stop_rx.clone();
        let deadline = match timeout {
            Some(timeout) => crossbeam_channel::after(timeout),
            None => crossbeam_channel::never(),
        };

        select! {
            recv(stop) -> _ => {
                self.source.cancel()?;
                Ok(Wait::Stopped)
            }
            recv(pending.receiver()) -> outcome => match outcome {
                Ok(outcome) => Ok(Wait::Ready(outcome)),
                Err(_) => Err(WatcherError::SourceDisconnected),
            },
            recv(deadline) -> _ => {
                self.source.cancel()?;
                // A completion may have raced the timeout.
                match pending.receiver().try_recv() {
                    Ok(outcome) => Ok(Wait::Ready(outcome)),
                    Err(_) => Ok(Wait::TimedOut),
                }
            }
        }
    }

    /// Turn one outcome into changes in `self.batch`. Returns `false` if a
    /// stop arrived while waiting for a rename partner.
    fn process(&mut self, outcome: ReadOutcome) -> Result<bool> {
        let mut records = match outcome {
            ReadOutcome::Overflow => {
                warn!("Change records lost, rescanning {}", self.path.display());
                self.resync()?;
                return Ok(true);
            }
            ReadOutcome::Failed(e) => return Err(e),
            ReadOutcome::Records(records) if records.is_empty() => {
                info!("Empty notification, rescanning {}", self.path.display());
                self.resync()?;
                return Ok(true);
            }
            ReadOutcome::Records(records) => records,
        };

        let settle = self.config.rename_settle();
        let deadline = Instant::now() + settle;
        while decode::has_unpaired_rename(&records) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.handle.set_state(WatchState::Waiting);
            match self.wait(Some(remaining))? {
                Wait::Ready(ReadOutcome::Records(more)) if !more.is_empty() => {
                    trace!("Collected {} more records for rename pairing", more.len());
                    records.extend(more);
                }
                // Anything else supersedes the partial batch.
                Wait::Ready(outcome) => return self.process(outcome),
                Wait::TimedOut => break,
                Wait::Stopped => return Ok(false),
            }
        }

        self.handle.set_state(WatchState::Decoding);
        let decoded = decode::decode(records, self.config.rename_pairing)?;

        self.handle.set_state(WatchState::Applying);
        match self.mirror.apply(&self.path, decoded, &mut self.batch) {
            Ok(()) => Ok(true),
            Err(WatcherError::Desync { kind, path })
                if self.config.desync_policy == DesyncPolicy::Rescan =>
            {
                warn!("Mirror out of sync ({kind} of '{path}'), rescanning");
                self.resync()?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Relist the directory and append the changes that bring the consumer
    /// in line with it.
    fn resync(&mut self) -> Result<()> {
        self.handle.set_state(WatchState::Scanning);
        let fresh = Mirror::enumerate(&self.path)?;
        self.mirror.resync(fresh, &mut self.batch);
        Ok(())
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| WatcherError::io(path, e))?;
    if !metadata.is_dir() {
        return Err(WatcherError::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}
