//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a new file and renaming it over the old one are seen.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::ProxyConfig;

/// Sends every valid, changed version of a configuration file.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = watch_dir(&self.path);
        let file_name = self.path.file_name().map(OsStr::to_os_string);
        let mut reload = Reloader {
            last_text: fs::read_to_string(&self.path).ok(),
            path: self.path.clone(),
            tx: self.update_tx,
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_relevant(&event, file_name.as_deref()) => reload.reload(),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, directory = ?dir, "Config watcher started");
        Ok(watcher)
    }
}

struct Reloader {
    path: PathBuf,
    last_text: Option<String>,
    tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl Reloader {
    fn reload(&mut self) {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            // Mid-rename: the next event carries the new file.
            Err(e) => {
                tracing::debug!(path = ?self.path, error = %e, "Config file not readable yet");
                return;
            }
        };
        if self.last_text.as_deref() == Some(text.as_str()) {
            return;
        }

        match parse_config(&text) {
            Ok(config) => {
                tracing::info!(
                    path = ?self.path,
                    endpoints = config.endpoints.len(),
                    plugins = config.plugins.len(),
                    "Config file changed, reloading"
                );
                self.last_text = Some(text);
                let _ = self.tx.send(config);
            }
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Invalid config file, keeping current configuration");
            }
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_relevant(event: &Event, file_name: Option<&OsStr>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };
    (event.kind.is_modify() || event.kind.is_create())
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};

    #[test]
    fn only_events_for_the_config_file_count() {
        let name = OsStr::new("proxy.toml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/etc/hook/proxy.toml".into());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/etc/hook/proxy.toml".into());
        let other = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/etc/hook/other.toml".into());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path("/etc/hook/proxy.toml".into());

        assert!(is_relevant(&modify, Some(name)));
        assert!(is_relevant(&create, Some(name)));
        assert!(!is_relevant(&other, Some(name)));
        assert!(!is_relevant(&remove, Some(name)));
        assert!(!is_relevant(&modify, None));
    }

    #[test]
    fn watches_the_parent_directory() {
        assert_eq!(watch_dir(Path::new("/etc/hook/proxy.toml")), PathBuf::from("/etc/hook"));
        assert_eq!(watch_dir(Path::new("proxy.toml")), PathBuf::from("."));
    }

    #[test]
    fn reloader_skips_unchanged_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reload = Reloader {
            path: path.clone(),
            last_text: None,
            tx,
        };

        fs::write(&path, "[backend]\naddress = \"127.0.0.1:4243\"\n").unwrap();
        reload.reload();
        assert_eq!(rx.try_recv().unwrap().backend.address, "127.0.0.1:4243");

        reload.reload();
        assert!(rx.try_recv().is_err());

        fs::write(&path, "[backend]\naddress = \"nope\"\n").unwrap();
        reload.reload();
        assert!(rx.try_recv().is_err());
    }
}
