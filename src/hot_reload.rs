//! Live reloading of the engine configuration.
//!
//! Watches the options file for changes and rebuilds the container's engine
//! handle from the new snapshot. If the new file fails to parse or the
//! engine cannot be built from it, the error is logged and the previous
//! engine keeps serving; the service never goes down over a bad save.
//!
//! Only engine construction is affected by a reload. Transport settings
//! (host, port, TLS) are bound at `start()` and take effect on restart; a
//! divergence is logged so operators notice.

use crate::container::Container;
use crate::options::ServerOptions;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Watch an options file and reload the container when it changes.
///
/// The returned watcher must be kept alive for the watching to continue.
pub fn watch_options<P: AsRef<Path>>(
    options_path: P,
    container: Arc<Container>,
) -> notify::Result<RecommendedWatcher> {
    let path: PathBuf = options_path.as_ref().to_path_buf();
    let watch_path = path.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    reload_from_file(&watch_path, &container);
                }
            }
            Err(e) => warn!(error = %e, "options watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(&path, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching options file for engine reloads");
    Ok(watcher)
}

fn reload_from_file(path: &Path, container: &Arc<Container>) {
    let new_options = match ServerOptions::from_yaml_file(path) {
        Ok(options) => options,
        Err(e) => {
            warn!(error = %e, "reload skipped: options file did not parse; keeping current engine");
            return;
        }
    };

    let current = container.configuration();
    if new_options.host != current.host
        || new_options.port != current.port
        || new_options.ssl != current.ssl
    {
        info!("transport settings changed in options file; they apply on restart only");
    }

    match container.reload_with(new_options) {
        Ok(()) => info!(path = %path.display(), "engine reloaded from options file"),
        Err(e) => {
            warn!(error = %e, "reload failed: keeping current engine");
        }
    }
}
