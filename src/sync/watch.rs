//! Filesystem watching for `sync --watch`.
//!
//! Watches the workspace assets directory and the virtual store, debounces
//! event bursts, and re-runs the provided sync closure after each batch.
//! Runs until the process is interrupted.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use log::{debug, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// Quiet period after the last event before re-syncing.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Watch `paths` and invoke `on_change` after every settled batch of
/// events. The closure's errors are reported and watching continues; only
/// watcher setup errors abort.
pub fn watch_and_sync<F>(paths: &[PathBuf], mut on_change: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    let (tx, rx) = mpsc::channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if let Ok(event) = event {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| Error::Generic(format!("failed to start watcher: {e}")))?;

    for path in paths {
        if !path.exists() {
            continue;
        }
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| Error::Generic(format!("failed to watch {}: {e}", path.display())))?;
        debug!("watching {}", path.display());
    }

    loop {
        // Block for the first event, then drain the burst.
        let Ok(first) = rx.recv() else {
            return Ok(());
        };
        debug!("fs event: {:?}", first.kind);
        while rx.recv_timeout(DEBOUNCE).is_ok() {}

        if let Err(e) = on_change() {
            warn!("sync after change failed: {e}");
        }
    }
}
