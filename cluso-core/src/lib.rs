//! # Cluso Core
//!
//! Shared vocabulary of the Cluso graph storage engine:
//! - Graph entity types and typed property values
//! - Error taxonomy
//! - Configuration surface
//! - Metrics counters and logging bootstrap
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   cluso-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • types    - Node, Edge, Direction, stats     │
//! │  • value    - Typed property values            │
//! │  • error    - Error handling                   │
//! │  • config   - DatabaseConfig                   │
//! │  • metrics  - Atomic counters                  │
//! │  • traits   - KeyValueStore contract           │
//! │  • logging  - tracing subscriber setup         │
//! │  • utils    - Common utilities                 │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod traits;
pub mod types;
pub mod utils;
pub mod value;

// Re-export commonly used types
pub use config::{DatabaseConfig, ShardingStrategy};
pub use error::{Error, ErrorKind, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use traits::KeyValueStore;
pub use types::{Direction, Edge, EdgeId, GraphStats, Node, NodeId, Properties};
pub use value::{Value, ValueType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// On-disk format version written into snapshots.
pub const FORMAT_VERSION: u32 = 1;
