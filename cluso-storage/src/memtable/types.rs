use std::time::Duration;

/// Flush and back-pressure thresholds.
#[derive(Debug, Clone)]
pub struct MemTableConfig {
    pub max_size: usize, // Bytes before the active table is rotated
    /// Immutable tables allowed to wait for the background flusher before a
    /// writer flushes inline.
    pub max_immutable: usize,
}

impl Default for MemTableConfig {
    fn default() -> Self {
        Self {
            max_size: 64 * 1024 * 1024, // 64MB
            max_immutable: 4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemTableStats {
    pub id: u64,
    pub entry_count: usize,
    pub size_bytes: usize,
    pub tombstones: usize,
    pub max_sequence: u64,
    pub age: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct MemTableManagerStats {
    pub active: MemTableStats,
    pub immutable: Vec<MemTableStats>,
}

impl MemTableManagerStats {
    pub fn total_bytes(&self) -> usize {
        self.active.size_bytes + self.immutable.iter().map(|s| s.size_bytes).sum::<usize>()
    }
}
