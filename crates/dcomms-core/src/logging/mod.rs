//! JSON-lines log files for headless nodes
//!
//! Several nodes often run side by side on one machine (two parties of a
//! test conversation, say). Each writes its own file so no two processes
//! ever append to the same one:
//!
//! ```text
//! <log_dir>/
//! └── raw/
//!     ├── 2026-10-18_alice.jsonl
//!     └── 2026-10-18_bob.jsonl
//! ```
//!
//! ```ignore
//! use dcomms_core::logging::JsonlLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let layer = JsonlLayer::new("./logs", "alice")?;
//! tracing_subscriber::registry()
//!     .with(layer)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! Filter afterwards with jq, e.g.
//! `jq 'select(.level == "warn")' logs/raw/*.jsonl`.

mod entry;
mod layer;
mod writer;

pub use entry::LogRecord;
pub use layer::JsonlLayer;
pub use writer::{read_records, NodeLogWriter};
