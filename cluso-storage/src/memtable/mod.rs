//! # MemTable - In-Memory Storage
//!
//! Recent writes land in a concurrent skip list ordered by key. When its byte
//! size crosses the configured threshold the active table is frozen and queued
//! for flushing to an SSTable, and a fresh table takes over.
//!
//! ## MemTable Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MemTableManager                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  put/delete ──> Active MemTable (skip list, key -> Record)  │
//! │                      │                                      │
//! │                      │ size >= max_size                     │
//! │                      ▼                                      │
//! │  Immutable queue: [oldest] ... [newest]                     │
//! │                      │                                      │
//! │                      │ flush (oldest first)                 │
//! │                      ▼                                      │
//! │                   SSTable                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads consult the active table, then the immutable queue newest first.

mod manager;
mod table;
mod types;

pub use manager::MemTableManager;
pub use table::MemTable;
pub use types::{MemTableConfig, MemTableManagerStats, MemTableStats};
