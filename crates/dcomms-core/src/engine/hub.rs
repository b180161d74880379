//! Directory-backed message exchange for the loopback engine
//!
//! Every conversation secret maps to one append-only JSON-lines log. Engines
//! (in one process or several) that share the hub directory publish their
//! outgoing messages there and read each other's entries during sync.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEntry {
    /// Entity id of the author
    pub from: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct LoopbackHub {
    dir: PathBuf,
}

impl LoopbackHub {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, secret_id: &str) -> PathBuf {
        // Secrets come from user-pasted invites; never use them as paths directly
        self.dir.join(format!("{}.log", hex::encode(secret_id)))
    }

    /// Append entries to the conversation's log
    pub fn publish(&self, secret_id: &str, entries: &[HubEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(secret_id))?;
        file.write_all(buf.as_bytes())?;
        file.flush()
    }

    /// Entries after the first `cursor` complete lines, plus the new cursor.
    ///
    /// A trailing line without a newline is still being written and is left
    /// for the next read. Malformed lines are skipped but consumed.
    pub fn read_from(&self, secret_id: &str, cursor: usize) -> io::Result<(Vec<HubEntry>, usize)> {
        let raw = match fs::read_to_string(self.log_path(secret_id)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), cursor)),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        let mut next = cursor;
        for line in raw
            .split_inclusive('\n')
            .filter(|l| l.ends_with('\n'))
            .skip(cursor)
        {
            next += 1;
            match serde_json::from_str::<HubEntry>(line.trim_end()) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping malformed hub entry"),
            }
        }
        Ok((entries, next))
    }
}
