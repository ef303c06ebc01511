//! Config file change watching

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use edgescope_core::{EdgeError, Result};

/// Keeps the filesystem watcher alive; dropping it stops the callbacks.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

/// Raises `reload` whenever the config file is modified. The orchestrator
/// loop consumes the flag.
pub fn watch_config(path: &Path, reload: Arc<AtomicBool>) -> Result<ConfigWatcher> {
    let path_display = path.display().to_string();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(_)) {
                info!("config file {path_display} changed, scheduling reload");
                reload.store(true, Ordering::Relaxed);
            }
        }
        Err(e) => warn!("config watcher error: {e}"),
    })
    .map_err(|e| EdgeError::Config(format!("failed to create config watcher: {e}")))?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| EdgeError::Config(format!("failed to watch config file: {e}")))?;

    Ok(ConfigWatcher { _watcher: watcher })
}
