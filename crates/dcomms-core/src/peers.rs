//! Peer liveness
//!
//! Peers advertise themselves in a shared registry file, one `host:port`
//! per line. Each refresh re-reads the file, probes every candidate with a
//! short TCP connect, and remembers when each one last answered.
//!
//! ```text
//! registry.db ──parse──► [PeerCandidate] ──probe (concurrent)──► [PeerRecord]
//!                                                 │
//!                                      last_seen map (kept across rounds)
//! ```

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Hosts under which this node registers itself
const SELF_HOSTS: &[&str] = &["127.0.0.1", "localhost", "0.0.0.0"];

/// One parsed registry line
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerCandidate {
    /// Host as written, brackets included for IPv6
    pub host: String,
    pub port: u16,
}

impl PeerCandidate {
    /// Host in the form a socket connect expects (`[::1]` becomes `::1`)
    pub fn connect_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    fn key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

/// Parse registry text into unique candidates, in file order.
///
/// Blank lines, duplicates, lines without a colon and lines whose port is
/// not a number are skipped. So is this node's own entry when `own_port` is
/// known.
///
/// The own entry is recognised by port plus a loopback or unspecified host
/// (`127.0.0.1`, `localhost`, `0.0.0.0`). Another host on the same port is
/// kept, which also means a node that registers itself under a LAN or IPv6
/// address (`192.168.1.5:9000`, `[::1]:9000`) will probe itself.
pub fn parse_peer_registry(text: &str, own_port: Option<u16>) -> Vec<PeerCandidate> {
    let mut seen_lines = HashSet::new();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || !seen_lines.insert(line) {
            continue;
        }
        let Some((host, port)) = line.rsplit_once(':') else {
            trace!(line, "Skipping registry line without port");
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            trace!(line, "Skipping registry line with bad port");
            continue;
        };
        if host.is_empty() {
            continue;
        }
        if Some(port) == own_port && SELF_HOSTS.contains(&host) {
            continue;
        }
        // "host:080" and "host:80" are the same peer
        if !seen.insert((host, port)) {
            continue;
        }
        candidates.push(PeerCandidate {
            host: host.to_string(),
            port,
        });
    }

    candidates
}

/// Liveness of one peer after a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerRecord {
    pub host: String,
    pub port: u16,
    /// Answered in this round
    pub live: bool,
    /// Last successful probe in any round
    pub last_seen: Option<DateTime<Utc>>,
}

/// Result of a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    /// Number of live peers
    pub count: usize,
    pub peers: Vec<PeerRecord>,
}

pub struct PeerLivenessTracker {
    registry_path: PathBuf,
    probe_timeout: Duration,
    last_seen: Mutex<HashMap<(String, u16), DateTime<Utc>>>,
}

impl PeerLivenessTracker {
    pub fn new(registry_path: impl Into<PathBuf>, probe_timeout: Duration) -> Self {
        Self {
            registry_path: registry_path.into(),
            probe_timeout,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry_path(&self) -> &std::path::Path {
        &self.registry_path
    }

    /// Current registry contents; a missing or unreadable file means no peers
    pub async fn candidates(&self, own_port: Option<u16>) -> Vec<PeerCandidate> {
        match tokio::fs::read_to_string(&self.registry_path).await {
            Ok(text) => parse_peer_registry(&text, own_port),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = ?self.registry_path, error = %e, "Failed to read peer registry");
                Vec::new()
            }
        }
    }

    /// Re-read the registry and probe every candidate concurrently.
    pub async fn refresh(&self, own_port: Option<u16>) -> PeerSnapshot {
        let candidates = self.candidates(own_port).await;
        if candidates.is_empty() {
            return PeerSnapshot::default();
        }

        let timeout = self.probe_timeout;
        let results = join_all(
            candidates
                .iter()
                .map(|candidate| probe(candidate.connect_host(), candidate.port, timeout)),
        )
        .await;

        let now = Utc::now();
        let mut last_seen = self.last_seen.lock();
        let peers: Vec<PeerRecord> = candidates
            .into_iter()
            .zip(results)
            .map(|(candidate, live)| {
                let key = candidate.key();
                if live {
                    last_seen.insert(key.clone(), now);
                }
                PeerRecord {
                    last_seen: last_seen.get(&key).copied(),
                    host: candidate.host,
                    port: candidate.port,
                    live,
                }
            })
            .collect();

        let count = peers.iter().filter(|p| p.live).count();
        debug!(count, total = peers.len(), "Peer liveness refreshed");
        PeerSnapshot { count, peers }
    }

    pub fn last_seen(&self, host: &str, port: u16) -> Option<DateTime<Utc>> {
        self.last_seen
            .lock()
            .get(&(host.to_string(), port))
            .copied()
    }
}

/// Connect-only reachability check. The stream is dropped immediately.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            trace!(host, port, error = %e, "Probe refused");
            false
        }
        Err(_) => {
            trace!(host, port, "Probe timed out");
            false
        }
    }
}
