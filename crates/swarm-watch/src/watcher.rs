//! Recursive OS-level file watching with 500 ms per-path debounce and a
//! rename-pairing heuristic, built on `notify` with events forwarded over
//! an async channel instead of a background `std::thread`.

use crate::echo::EchoSuppressor;
use crate::error::{WatchError, WatchResult};
use crate::events::{RawKind, WatchEvent};
use crate::ignore::IgnorePolicy;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_core::CancellationToken;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

pub const DEBOUNCE: Duration = Duration::from_millis(500);
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

enum RawEvent {
    Path(PathBuf, RawKind),
    RenameFrom(PathBuf),
    RenameTo(PathBuf),
    Overflow,
}

struct PendingEntry {
    kind: RawKind,
    at: Instant,
}

/// Owns the live `notify` watch; dropping it stops the watch.
pub struct FileWatcher {
    _inner: RecommendedWatcher,
}

impl FileWatcher {
    /// Start watching `root` recursively. Returns the handle (keep it
    /// alive for as long as watching should continue) and the debounced
    /// event stream.
    pub fn spawn(
        root: PathBuf,
        ignore_policy: IgnorePolicy,
        echo: Arc<EchoSuppressor>,
        cancel: CancellationToken,
    ) -> WatchResult<(Self, UnboundedReceiver<WatchEvent>)> {
        if !root.exists() {
            return Err(WatchError::RootMissing(root));
        }
        let root = root
            .canonicalize()
            .map_err(|_| WatchError::RootMissing(root.clone()))?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();

        let mut inner = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => dispatch_raw(event, &raw_tx),
                Err(err) => {
                    error!(%err, "watch backend reported an error, requesting rescan");
                    let _ = raw_tx.send(RawEvent::Overflow);
                }
            },
            Config::default(),
        )
        .map_err(|source| WatchError::Watch { path: root.clone(), source })?;

        inner
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch { path: root.clone(), source })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce_loop(root, raw_rx, event_tx, ignore_policy, echo, cancel));

        Ok((Self { _inner: inner }, event_rx))
    }
}

fn dispatch_raw(event: Event, tx: &UnboundedSender<RawEvent>) {
    match event.kind {
        EventKind::Create(_) => {
            for path in event.paths {
                let _ = tx.send(RawEvent::Path(path, RawKind::Create));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(path) = event.paths.into_iter().next() {
                let _ = tx.send(RawEvent::RenameFrom(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if let Some(path) = event.paths.into_iter().next() {
                let _ = tx.send(RawEvent::RenameTo(path));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            if let (Some(from), Some(to)) = (paths.next(), paths.next()) {
                let _ = tx.send(RawEvent::RenameFrom(from));
                let _ = tx.send(RawEvent::RenameTo(to));
            }
        }
        EventKind::Modify(_) => {
            for path in event.paths {
                let _ = tx.send(RawEvent::Path(path, RawKind::Modify));
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                let _ = tx.send(RawEvent::Path(path, RawKind::Delete));
            }
        }
        _ => {}
    }
}

async fn debounce_loop(
    root: PathBuf,
    mut raw_rx: UnboundedReceiver<RawEvent>,
    event_tx: UnboundedSender<WatchEvent>,
    ignore_policy: IgnorePolicy,
    echo: Arc<EchoSuppressor>,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, PendingEntry> = HashMap::new();
    let mut rename_from: Option<(PathBuf, Instant)> = None;
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = sweep.tick() => {
                flush_expired(&root, &mut pending, &mut rename_from, &ignore_policy, &echo, &event_tx);
            }
            maybe_raw = raw_rx.recv() => {
                match maybe_raw {
                    None => break,
                    Some(RawEvent::Overflow) => {
                        pending.clear();
                        rename_from = None;
                        let _ = event_tx.send(WatchEvent::RescanRequested);
                    }
                    Some(RawEvent::RenameFrom(path)) => {
                        rename_from = Some((path, Instant::now()));
                    }
                    Some(RawEvent::RenameTo(to)) => {
                        if let Some((from, _)) = rename_from.take() {
                            emit_rename(&root, &ignore_policy, &echo, &event_tx, from, to);
                        } else {
                            pending.insert(to, PendingEntry { kind: RawKind::Create, at: Instant::now() });
                        }
                    }
                    Some(RawEvent::Path(path, kind)) => {
                        pending.insert(path, PendingEntry { kind, at: Instant::now() });
                    }
                }
            }
        }
    }
}

fn flush_expired(
    root: &Path,
    pending: &mut HashMap<PathBuf, PendingEntry>,
    rename_from: &mut Option<(PathBuf, Instant)>,
    ignore_policy: &IgnorePolicy,
    echo: &EchoSuppressor,
    event_tx: &UnboundedSender<WatchEvent>,
) {
    // An unpaired RenameOldPath that has sat longer than the debounce
    // window falls back to a Delete of the original path.
    if let Some((from, at)) = rename_from.as_ref() {
        if at.elapsed() >= DEBOUNCE {
            let from = from.clone();
            *rename_from = None;
            emit_single(root, ignore_policy, echo, event_tx, from, RawKind::Delete);
        }
    }

    let expired: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, entry)| entry.at.elapsed() >= DEBOUNCE)
        .map(|(path, _)| path.clone())
        .collect();

    for path in expired {
        if let Some(entry) = pending.remove(&path) {
            emit_single(root, ignore_policy, echo, event_tx, path, entry.kind);
        }
    }
}

fn emit_single(
    root: &Path,
    ignore_policy: &IgnorePolicy,
    echo: &EchoSuppressor,
    event_tx: &UnboundedSender<WatchEvent>,
    path: PathBuf,
    kind: RawKind,
) {
    let relative = path.strip_prefix(root).unwrap_or(&path);
    if ignore_policy.is_ignored(relative) {
        return;
    }
    if echo.should_suppress(&path) {
        debug!(?path, "suppressing self-inflicted watch event");
        return;
    }
    let event = match kind {
        RawKind::Create => WatchEvent::Created(path),
        RawKind::Modify => WatchEvent::Modified(path),
        RawKind::Delete => WatchEvent::Deleted(path),
    };
    let _ = event_tx.send(event);
}

fn emit_rename(
    root: &Path,
    ignore_policy: &IgnorePolicy,
    echo: &EchoSuppressor,
    event_tx: &UnboundedSender<WatchEvent>,
    from: PathBuf,
    to: PathBuf,
) {
    let rel_from = from.strip_prefix(root).unwrap_or(&from);
    let rel_to = to.strip_prefix(root).unwrap_or(&to);
    if ignore_policy.is_ignored(rel_from) && ignore_policy.is_ignored(rel_to) {
        return;
    }
    if echo.should_suppress(&from) || echo.should_suppress(&to) {
        debug!(?from, ?to, "suppressing self-inflicted rename");
        return;
    }
    let _ = event_tx.send(WatchEvent::Renamed { from, to });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn reports_file_creation() {
        let dir = tempdir().unwrap();
        let (_watcher, mut rx) = FileWatcher::spawn(
            dir.path().to_path_buf(),
            IgnorePolicy::default(),
            Arc::new(EchoSuppressor::default()),
            CancellationToken::new(),
        )
        .unwrap();

        let file_path = dir.path().join("hello.txt");
        std::fs::write(&file_path, b"hi").unwrap();

        let event = timeout(StdDuration::from_secs(3), rx.recv())
            .await
            .expect("event received within timeout")
            .expect("channel open");
        match event {
            WatchEvent::Created(p) => assert_eq!(p.canonicalize().unwrap(), file_path.canonicalize().unwrap()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hidden_paths_are_never_reported() {
        let dir = tempdir().unwrap();
        let (_watcher, mut rx) = FileWatcher::spawn(
            dir.path().to_path_buf(),
            IgnorePolicy::default(),
            Arc::new(EchoSuppressor::default()),
            CancellationToken::new(),
        )
        .unwrap();

        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        // Give the watcher a chance to observe and debounce the event,
        // then confirm nothing surfaced.
        let result = timeout(StdDuration::from_millis(900), rx.recv()).await;
        assert!(result.is_err(), "hidden-file event should never surface");
    }

    #[tokio::test]
    async fn echo_suppressed_write_does_not_surface() {
        let dir = tempdir().unwrap();
        let echo = Arc::new(EchoSuppressor::default());
        let file_path = dir.path().join("synced.txt");

        let (_watcher, mut rx) = FileWatcher::spawn(
            dir.path().to_path_buf(),
            IgnorePolicy::default(),
            echo.clone(),
            CancellationToken::new(),
        )
        .unwrap();

        echo.register(&file_path.canonicalize().unwrap_or(file_path.clone()));
        std::fs::write(&file_path, b"from peer").unwrap();

        let result = timeout(StdDuration::from_millis(900), rx.recv()).await;
        assert!(result.is_err(), "echoed write should be suppressed");
    }
}
