//! Append-only per-node log file

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::LogRecord;

pub struct NodeLogWriter {
    node: String,
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl NodeLogWriter {
    /// Open (or continue) today's file for `node` under `<log_dir>/raw/`
    pub fn open(log_dir: impl AsRef<Path>, node: impl Into<String>) -> io::Result<Self> {
        let node = node.into();
        let raw_dir = log_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, node));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            node,
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record as a single line and flush it
    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut out = self.out.lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

impl Drop for NodeLogWriter {
    fn drop(&mut self) {
        let _ = self.out.lock().flush();
    }
}

/// Every parseable record in one log file, in file order
pub fn read_records(path: impl AsRef<Path>) -> io::Result<Vec<LogRecord>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_named_by_date_and_node() {
        let temp = TempDir::new().unwrap();
        let writer = NodeLogWriter::open(temp.path(), "alice").unwrap();
        let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_alice.jsonl"));
        assert_eq!(writer.path().parent().unwrap(), temp.path().join("raw"));
    }

    #[test]
    fn test_append_and_read_back() {
        let temp = TempDir::new().unwrap();
        let writer = NodeLogWriter::open(temp.path(), "bob").unwrap();
        writer
            .append(&LogRecord::now("info", "bob", "t", "first"))
            .unwrap();
        writer
            .append(&LogRecord::now("debug", "bob", "t", "second"))
            .unwrap();

        // A torn line from a crashed process is skipped
        let mut file = OpenOptions::new().append(true).open(writer.path()).unwrap();
        writeln!(file, "{{\"ts\":").unwrap();

        let records = read_records(writer.path()).unwrap();
        let msgs: Vec<_> = records.iter().map(|r| r.msg.as_str()).collect();
        assert_eq!(msgs, vec!["first", "second"]);
    }
}
