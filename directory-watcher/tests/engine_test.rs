//! Integration tests for the watch engine.
//!
//! These drive a `DirectoryWatcher` through an in-process `ChannelSource`, so
//! the sequence of raw records is exact and the assertions can be too.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use dirmirror_directory_watcher::{
    ChangeEntry, ChannelFeed, ChannelSource, DesyncPolicy, DirectoryWatcher, RawAction, RawRecord,
    RenamePairing, Replica, Result, WatchHandle, WatchState, WatcherConfig, WatcherError,
};
use pretty_assertions::assert_eq;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A watcher running on its own thread, fed through a `ChannelFeed`.
struct Harness {
    feed: ChannelFeed,
    handle: WatchHandle,
    batches: Receiver<Vec<ChangeEntry>>,
    thread: thread::JoinHandle<(Result<()>, Vec<String>)>,
}

/// What a finished watch left behind.
struct Finished {
    result: Result<()>,
    mirror: Vec<String>,
    undelivered: Vec<Vec<ChangeEntry>>,
}

impl Harness {
    fn start(dir: &Path, config: WatcherConfig) -> Self {
        init_tracing();
        let (source, feed) = ChannelSource::new();
        let mut watcher = DirectoryWatcher::with_source(dir, config, source).unwrap();
        let handle = watcher.handle();
        let (tx, batches) = crossbeam_channel::unbounded();

        let thread = thread::spawn(move || {
            let result = watcher.start_watch(|changes| {
                let _ = tx.send(changes.to_vec());
            });
            let mirror = watcher.mirror().iter().map(ToString::to_string).collect();
            (result, mirror)
        });

        Self {
            feed,
            handle,
            batches,
            thread,
        }
    }

    fn next_batch(&self) -> Vec<ChangeEntry> {
        self.batches
            .recv_timeout(TIMEOUT)
            .expect("batch was not delivered")
    }

    fn stop(self) -> Finished {
        self.handle.stop();
        self.join()
    }

    fn join(self) -> Finished {
        let (result, mirror) = self.thread.join().expect("watch thread panicked");
        Finished {
            result,
            mirror,
            undelivered: self.batches.try_iter().collect(),
        }
    }
}

fn quick() -> WatcherConfig {
    WatcherConfig::default().with_rename_settle(Duration::ZERO)
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), name.as_bytes()).unwrap();
}

#[test]
fn test_bootstrap_lists_entries_in_order() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "b.txt");
    touch(dir.path(), "a.txt");

    let harness = Harness::start(dir.path(), quick());
    assert_eq!(
        harness.next_batch(),
        vec![ChangeEntry::added(0, "a.txt"), ChangeEntry::added(1, "b.txt")]
    );

    let finished = harness.stop();
    finished.result.unwrap();
    assert_eq!(finished.mirror, vec!["a.txt", "b.txt"]);
}

#[test]
fn test_rename_halves_pair_in_either_order() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a.txt");
    touch(dir.path(), "b.txt");

    let harness = Harness::start(dir.path(), quick());
    harness.next_batch();

    harness
        .feed
        .push([RawRecord::renamed_old("b.txt"), RawRecord::renamed_new("c.txt")]);
    assert_eq!(
        harness.next_batch(),
        vec![ChangeEntry::renamed(1, "b.txt", "c.txt")]
    );

    harness
        .feed
        .push([RawRecord::renamed_new("d.txt"), RawRecord::renamed_old("a.txt")]);
    assert_eq!(
        harness.next_batch(),
        vec![ChangeEntry::renamed(0, "a.txt", "d.txt")]
    );

    let finished = harness.stop();
    assert_eq!(finished.mirror, vec!["d.txt", "c.txt"]);
}

#[test]
fn test_split_rename_waits_for_partner() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "old.txt");

    let config = WatcherConfig::default().with_rename_settle(Duration::from_secs(2));
    let harness = Harness::start(dir.path(), config);
    harness.next_batch();

    harness.feed.push([RawRecord::renamed_old("old.txt")]);
    harness.feed.push([RawRecord::renamed_new("new.txt")]);
    assert_eq!(
        harness.next_batch(),
        vec![ChangeEntry::renamed(0, "old.txt", "new.txt")]
    );

    harness.stop().result.unwrap();
}

#[test]
fn test_lone_halves_become_remove_and_add() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a.txt");

    let harness = Harness::start(dir.path(), quick());
    harness.next_batch();

    harness.feed.push([RawRecord::renamed_old("a.txt")]);
    assert_eq!(harness.next_batch(), vec![ChangeEntry::removed(0, "a.txt")]);

    harness.feed.push([RawRecord::renamed_new("z.txt")]);
    assert_eq!(harness.next_batch(), vec![ChangeEntry::added(0, "z.txt")]);

    harness.stop().result.unwrap();
}

#[test]
fn test_indices_track_the_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path(), quick());
    assert_eq!(harness.next_batch(), Vec::<ChangeEntry>::new());

    harness.feed.push([
        RawRecord::added("a"),
        RawRecord::added("b"),
        RawRecord::added("c"),
    ]);
    assert_eq!(
        harness.next_batch(),
        vec![
            ChangeEntry::added(0, "a"),
            ChangeEntry::added(1, "b"),
            ChangeEntry::added(2, "c"),
        ]
    );

    harness.feed.push([
        RawRecord::removed("b"),
        RawRecord::modified("c"),
        RawRecord::added("A"),
    ]);
    assert_eq!(
        harness.next_batch(),
        vec![
            ChangeEntry::removed(1, "b"),
            ChangeEntry::modified(1, "c"),
            ChangeEntry::modified(0, "A"),
        ]
    );

    let finished = harness.stop();
    assert_eq!(finished.mirror, vec!["a", "c"]);
}

#[test]
fn test_replica_follows_every_batch() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "one");
    touch(dir.path(), "two");

    let harness = Harness::start(dir.path(), quick());
    let mut replica = Replica::new();
    replica.apply(&harness.next_batch()).unwrap();

    let script: Vec<Vec<RawRecord>> = vec![
        vec![RawRecord::added("three"), RawRecord::removed("one")],
        vec![RawRecord::renamed_old("two"), RawRecord::renamed_new("three")],
        vec![RawRecord::added("four"), RawRecord::root(RawAction::Modified)],
        vec![RawRecord::renamed_new("five"), RawRecord::renamed_old("four")],
    ];
    for records in script {
        harness.feed.push(records);
        replica.apply(&harness.next_batch()).unwrap();
    }

    let finished = harness.stop();
    let rows: Vec<String> = replica.rows().iter().map(ToString::to_string).collect();
    assert_eq!(rows, finished.mirror);
    assert_eq!(rows, vec!["three", "five"]);
}

#[test]
fn test_overflow_rescans_directory() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a");
    touch(dir.path(), "b");

    let harness = Harness::start(dir.path(), quick());
    let mut replica = Replica::new();
    replica.apply(&harness.next_batch()).unwrap();

    touch(dir.path(), "c");
    harness.feed.overflow();
    let batch = harness.next_batch();
    assert_eq!(
        batch,
        vec![
            ChangeEntry::removed(1, "b"),
            ChangeEntry::removed(0, "a"),
            ChangeEntry::added(0, "a"),
            ChangeEntry::added(1, "b"),
            ChangeEntry::added(2, "c"),
        ]
    );
    replica.apply(&batch).unwrap();

    std::fs::remove_file(dir.path().join("a")).unwrap();
    harness.feed.push(Vec::<RawRecord>::new());
    replica.apply(&harness.next_batch()).unwrap();

    let finished = harness.stop();
    assert_eq!(finished.mirror, vec!["b", "c"]);
    assert_eq!(replica.len(), 2);
}

#[test]
fn test_desync_rescan_keeps_applied_prefix() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), "a");

    let harness = Harness::start(dir.path(), quick());
    let mut replica = Replica::new();
    replica.apply(&harness.next_batch()).unwrap();

    touch(dir.path(), "b");
    harness
        .feed
        .push([RawRecord::added("b"), RawRecord::removed("ghost")]);
    let batch = harness.next_batch();
    assert_eq!(
        batch,
        vec![
            ChangeEntry::added(1, "b"),
            ChangeEntry::removed(1, "b"),
            ChangeEntry::removed(0, "a"),
            ChangeEntry::added(0, "a"),
            ChangeEntry::added(1, "b"),
        ]
    );
    replica.apply(&batch).unwrap();

    let finished = harness.stop();
    finished.result.unwrap();
    assert_eq!(finished.mirror, vec!["a", "b"]);
}

#[test]
fn test_desync_fail_ends_watch() {
    let dir = tempfile::tempdir().unwrap();
    let config = quick().with_desync_policy(DesyncPolicy::Fail);
    let harness = Harness::start(dir.path(), config);
    harness.next_batch();

    harness.feed.push([RawRecord::modified("ghost")]);
    let finished = harness.join();
    match finished.result {
        Err(WatcherError::Desync { path, .. }) => assert_eq!(path.as_str(), "ghost"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(finished.undelivered.is_empty());
}

#[test]
fn test_strict_pairing_rejects_interleaving() {
    let dir = tempfile::tempdir().unwrap();
    let config = quick().with_rename_pairing(RenamePairing::Strict);
    let harness = Harness::start(dir.path(), config);
    harness.next_batch();

    harness
        .feed
        .push([RawRecord::renamed_old("a"), RawRecord::added("b")]);
    let finished = harness.join();
    assert!(matches!(
        finished.result,
        Err(WatcherError::RenameOrder { .. })
    ));
}

#[test]
fn test_source_failure_ends_watch() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path(), quick());
    harness.next_batch();

    harness
        .feed
        .fail(WatcherError::Config("backend gone".to_string()));
    assert!(matches!(
        harness.join().result,
        Err(WatcherError::Config(_))
    ));
}

#[test]
fn test_dropped_feed_disconnects() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path(), quick());
    harness.next_batch();

    let Harness {
        feed,
        handle,
        batches,
        thread,
    } = harness;
    drop(feed);
    let (result, _) = thread.join().unwrap();
    assert!(matches!(result, Err(WatcherError::SourceDisconnected)));
    assert_eq!(handle.state(), WatchState::Stopped);
    drop(batches);
}

#[test]
fn test_stop_in_callback_suppresses_queued_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (source, feed) = ChannelSource::new();
    let mut watcher = DirectoryWatcher::with_source(dir.path(), quick(), source).unwrap();
    let handle = watcher.handle();

    feed.push([RawRecord::added("first")]);
    feed.push([RawRecord::added("second")]);

    let mut seen = Vec::new();
    watcher
        .start_watch(|changes| {
            seen.push(changes.to_vec());
            if seen.len() == 2 {
                handle.stop();
            }
        })
        .unwrap();

    assert_eq!(
        seen,
        vec![vec![], vec![ChangeEntry::added(0, "first")]]
    );
    assert_eq!(handle.state(), WatchState::Stopped);
    handle.stop();
}

#[test]
fn test_stop_while_waiting_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::start(dir.path(), quick());
    harness.next_batch();

    let deadline = Instant::now() + TIMEOUT;
    while harness.handle.state() != WatchState::Waiting {
        assert!(Instant::now() < deadline, "watch never started waiting");
        thread::sleep(Duration::from_millis(5));
    }

    let handle = harness.handle.clone();
    let finished = harness.stop();
    finished.result.unwrap();
    assert!(finished.undelivered.is_empty());
    handle.stop();
    assert_eq!(handle.state(), WatchState::Stopped);
}
