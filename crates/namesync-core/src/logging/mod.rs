//! Per-instance JSONL logging.
//!
//! Each session instance writes its own JSONL file so two partners running
//! side by side (for example under `namesync simulate`) never interleave
//! writes. Console output goes through the usual `tracing_subscriber::fmt`
//! layer.
//!
//! ## Layout
//!
//! ```text
//! logs/
//! ├── 2026-10-19_alice.jsonl
//! └── 2026-10-19_bob.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use namesync_core::logging::LoggingBuilder;
//!
//! LoggingBuilder::new("alice")
//!     .with_log_dir("./logs")
//!     .with_filter("namesync_core=debug")
//!     .init()?;
//! ```
//!
//! ### Querying logs with jq
//!
//! ```bash
//! # Version gaps and resyncs
//! jq 'select(.msg | test("gap|resync"; "i"))' logs/*.jsonl
//!
//! # One room only
//! jq 'select(.fields.room == "k3v9qa")' logs/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_entries, InstanceLogWriter};
