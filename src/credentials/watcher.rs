//! File-watch reload for on-disk OAuth credential files.
//!
//! Grounded on the `notify`-based watcher in the example pack's file
//! index (`RecommendedWatcher` forwarding events through an
//! `mpsc::channel`, a spawned task debouncing bursts before acting):
//! the same shape here, minus index rebuilding, since all we need on a
//! change event is "re-read the file and swap the credential in".

use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Keeps the underlying watcher and its debounce task alive; dropping
/// this stops watching.
pub struct FileWatchHandle {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
}

/// Watches `path`'s parent directory (watching the file itself misses
/// editors that replace it via rename-on-save) and invokes `on_change`
/// at most once per debounce window after a burst of filesystem events.
pub fn watch_file<F>(path: PathBuf, on_change: F) -> notify::Result<FileWatchHandle>
where
    F: Fn() + Send + 'static,
{
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(64);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        },
        notify::Config::default(),
    )?;

    let watch_dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

    let task = tokio::spawn(async move {
        let mut pending = false;
        loop {
            tokio::select! {
                biased;
                result = event_rx.recv() => {
                    match result {
                        Some(_) => pending = true,
                        None => break,
                    }
                }
                _ = tokio::time::sleep(DEBOUNCE), if pending => {
                    pending = false;
                    on_change();
                }
            }
        }
    });

    Ok(FileWatchHandle {
        _watcher: watcher,
        _task: task,
    })
}
