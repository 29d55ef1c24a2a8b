//! Append-only JSON-lines log shared by inbound audit and dead-letter trails.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

/// One serialized entry per line; clones share the same handle and lock.
#[derive(Clone)]
pub struct JsonlEventLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JsonlEventLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let mut line = serde_json::to_vec(entry).context("failed to encode event log entry")?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log {} lock is poisoned", self.path.display()))?;
        // A single write keeps concurrent appenders from interleaving partial lines.
        file.write_all(&line)
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}
