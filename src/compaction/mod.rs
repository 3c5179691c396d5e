use crate::config::GcConfig;

/// Dead-space accounting for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Index records written since the log was last rewritten, tombstones included.
    pub records: u64,
    /// Keys currently in the trie.
    pub live: u64,
    /// Physical size of the value area of the data log.
    pub data_size: u64,
    /// Bytes addressed by live records.
    pub live_bytes: u64,
}

impl GcStats {
    pub fn dead_records(&self) -> u64 {
        self.records.saturating_sub(self.live)
    }

    pub fn dead_bytes(&self) -> u64 {
        self.data_size.saturating_sub(self.live_bytes)
    }
}

/// What a GC pass has to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPlan {
    /// Rewrite the index log from the trie; the data log is untouched.
    IndexOnly,
    /// Re-insert every live value into fresh index and data logs.
    Full,
}

/// Decides when a shard's logs are worth rewriting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compactor {
    config: GcConfig,
}

impl Compactor {
    pub fn new(config: GcConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Whether the index log holds enough dead records to rewrite.
    ///
    /// A log without any dead record is never rewritten, even when forced.
    pub fn should_compact_index(&self, stats: &GcStats, force: bool) -> bool {
        let dead = stats.dead_records();
        if dead == 0 {
            return false;
        }
        if force {
            return true;
        }
        self.over_band(
            dead,
            stats.live,
            stats.records,
            self.config.index_min_dead,
            self.config.index_max_dead,
        )
    }

    /// Whether the data log holds enough dead bytes to rewrite.
    pub fn should_compact_data(&self, stats: &GcStats, force: bool) -> bool {
        if force {
            return true;
        }
        self.over_band(
            stats.dead_bytes(),
            stats.live_bytes,
            stats.data_size,
            self.config.data_min_dead,
            self.config.data_max_dead,
        )
    }

    /// The data log is only considered once the index log qualifies.
    pub fn plan(&self, stats: &GcStats, force: bool) -> Option<GcPlan> {
        if !self.should_compact_index(stats, force) {
            return None;
        }
        if self.should_compact_data(stats, force) {
            Some(GcPlan::Full)
        } else {
            Some(GcPlan::IndexOnly)
        }
    }

    fn over_band(&self, dead: u64, live: u64, total: u64, min: u64, max: u64) -> bool {
        if dead < min {
            return false;
        }
        if dead < max && total > 0 && live as f64 / total as f64 > self.config.live_ratio {
            return false;
        }
        true
    }
}
