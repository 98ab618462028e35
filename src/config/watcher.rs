//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events per save; a reload is only
//! forwarded when the endpoint list actually changed.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{EndpointConfig, RouterConfig};

/// Watches the router configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RouterConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RouterConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let tx = self.update_tx;
        let last = Mutex::new(load_config(&path).ok().map(|c| c.endpoints));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) => {
                    let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(config) = reload(&path, &mut last) {
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Load `path` and return it when its endpoint list differs from `last`.
/// An invalid file keeps the current configuration.
fn reload(path: &Path, last: &mut Option<Vec<EndpointConfig>>) -> Option<RouterConfig> {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            return None;
        }
    };

    if last.as_ref() == Some(&config.endpoints) {
        tracing::debug!(path = ?path, "Config touched but endpoints unchanged");
        return None;
    }

    tracing::info!(path = ?path, endpoints = config.endpoints.len(), "Config reloaded");
    *last = Some(config.endpoints.clone());
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, url: &str) {
        let body = format!(
            "[[endpoints]]\nname = \"a\"\nmodel = \"llm\"\nurl = \"{}\"\ntype = \"rest\"\n",
            url
        );
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_reload_only_forwards_changes() {
        let path = std::env::temp_dir().join(format!("router-watch-{}.toml", std::process::id()));
        write(&path, "http://127.0.0.1:9000/");

        let mut last = None;
        assert!(reload(&path, &mut last).is_some());
        assert!(reload(&path, &mut last).is_none());

        write(&path, "http://127.0.0.1:9001/");
        let config = reload(&path, &mut last).unwrap();
        assert_eq!(config.endpoints[0].url, "http://127.0.0.1:9001/");

        std::fs::write(&path, "endpoints = 3").unwrap();
        assert!(reload(&path, &mut last).is_none());
        assert_eq!(last.as_ref().unwrap()[0].url, "http://127.0.0.1:9001/");

        let _ = std::fs::remove_file(&path);
    }
}
