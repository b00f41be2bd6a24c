//! Background worker that owns the watcher thread.
//!
//! A [`WatcherWorker`] runs one watch at a time on a dedicated thread.
//! Calling [`WatcherWorker::run`] again stops the current watch and starts a
//! new one on the new path. The worker reports through a [`WatchHooks`]
//! implementation; [`ChannelHooks`] forwards everything to a tokio channel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::ChangeEntry;
use crate::watcher::{DirectoryWatcher, WatchHandle};

const THREAD_NAME: &str = "dirmirror-watcher";

/// Callbacks invoked on the worker thread.
///
/// For every watch the worker calls `on_start` once, `on_update` for each
/// batch, then `on_stop` once. No lock is held while a hook runs.
pub trait WatchHooks: Send + 'static {
    /// A watch of `path` is about to start.
    fn on_start(&mut self, _path: &Path) {}

    /// A batch of changes. The first batch of a watch is the initial listing.
    fn on_update(&mut self, _changes: &[ChangeEntry]) {}

    /// The watch ended, with the error that ended it, if any.
    fn on_stop(&mut self, _error: Option<WatcherError>) {}
}

/// Event forwarded by [`ChannelHooks`].
#[derive(Debug)]
pub enum WorkerEvent {
    /// A watch started.
    Started { path: PathBuf },

    /// A batch of changes.
    Changes(Vec<ChangeEntry>),

    /// The watch ended.
    Stopped { error: Option<WatcherError> },
}

/// Hooks that forward every callback to a bounded tokio channel.
///
/// Sending blocks the worker thread while the channel is full. Dropping the
/// receiver turns further events into no-ops.
#[derive(Debug, Clone)]
pub struct ChannelHooks {
    tx: mpsc::Sender<WorkerEvent>,
}

impl ChannelHooks {
    /// Create hooks and the receiver they feed.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn send(&self, event: WorkerEvent) {
        if self.tx.blocking_send(event).is_err() {
            debug!("Worker event receiver dropped");
        }
    }
}

impl WatchHooks for ChannelHooks {
    fn on_start(&mut self, path: &Path) {
        self.send(WorkerEvent::Started {
            path: path.to_path_buf(),
        });
    }

    fn on_update(&mut self, changes: &[ChangeEntry]) {
        self.send(WorkerEvent::Changes(changes.to_vec()));
    }

    fn on_stop(&mut self, error: Option<WatcherError>) {
        self.send(WorkerEvent::Stopped { error });
    }
}

#[derive(Default)]
struct WorkerState {
    /// Path of the latest `run` request.
    path: PathBuf,

    /// A new watch was requested.
    wake_up: bool,

    /// The worker is shutting down.
    exit: bool,

    /// Handle of the watch in progress.
    live: Option<WatchHandle>,
}

impl WorkerState {
    fn stop_live(&self) {
        if let Some(handle) = &self.live {
            handle.stop();
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

/// Owns a background thread that watches one directory at a time.
pub struct WatcherWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherWorker {
    /// Spawn a worker with the default watcher configuration.
    pub fn spawn<H: WatchHooks>(hooks: H) -> Result<Self> {
        Self::spawn_with_config(WatcherConfig::default(), hooks)
    }

    /// Spawn a worker whose watches use `config`.
    pub fn spawn_with_config<H: WatchHooks>(config: WatcherConfig, hooks: H) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::default());
        let routine = Routine {
            shared: Arc::clone(&shared),
            config,
            hooks,
        };
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || routine.run())
            .map_err(WatcherError::Spawn)?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Watch `path`, replacing any watch in progress.
    ///
    /// Returns immediately. Errors, including a missing directory, are
    /// reported through [`WatchHooks::on_stop`].
    pub fn run(&self, path: impl Into<PathBuf>) {
        let mut state = self.shared.state.lock();
        state.stop_live();
        state.path = path.into();
        state.wake_up = true;
        self.shared.wake.notify_one();
    }

    /// Stop the watch in progress, if any. The worker stays alive.
    pub fn stop(&self) {
        self.shared.state.lock().stop_live();
    }

    /// Path of the latest `run` request. Empty if `run` was never called.
    pub fn path(&self) -> PathBuf {
        self.shared.state.lock().path.clone()
    }

    /// Whether a watch is in progress.
    pub fn is_watching(&self) -> bool {
        self.shared.state.lock().live.is_some()
    }
}

impl Drop for WatcherWorker {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop_live();
            state.exit = true;
            self.shared.wake.notify_one();
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Watcher worker thread panicked");
            }
        }
    }
}

/// State owned by the worker thread.
struct Routine<H> {
    shared: Arc<Shared>,
    config: WatcherConfig,
    hooks: H,
}

impl<H: WatchHooks> Routine<H> {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();

        loop {
            while !state.wake_up && !state.exit {
                shared.wake.wait(&mut state);
            }
            if state.exit {
                break;
            }
            state.wake_up = false;

            let path = state.path.clone();
            let watcher = DirectoryWatcher::with_config(&path, self.config.clone());
            if let Ok(watcher) = &watcher {
                state.live = Some(watcher.handle());
            }

            let outcome = MutexGuard::unlocked(&mut state, || self.watch(&path, watcher));
            state.live = None;
            MutexGuard::unlocked(&mut state, || self.finish(outcome));
        }

        debug!("Watcher worker exiting");
    }

    fn watch(&mut self, path: &Path, watcher: Result<DirectoryWatcher>) -> Result<()> {
        info!("Worker starting watch of {}", path.display());
        let hooks = &mut self.hooks;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            hooks.on_start(path);
            let mut watcher = watcher?;
            watcher.start_watch(|changes| hooks.on_update(changes))
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Watch hook panicked: {message}");
                Err(WatcherError::CallbackPanicked(message))
            }
        }
    }

    fn finish(&mut self, outcome: Result<()>) {
        let hooks = &mut self.hooks;
        if panic::catch_unwind(AssertUnwindSafe(|| hooks.on_stop(outcome.err()))).is_err() {
            error!("on_stop hook panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_path_empty_before_run() {
        let worker = WatcherWorker::spawn(ChannelHooks::new(4).0).unwrap();
        assert_eq!(worker.path(), PathBuf::new());
        assert!(!worker.is_watching());
    }
}
