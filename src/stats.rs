use serde::Serialize;

/// Per-registry counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub live_slots: usize,
    pub resident_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub reloads: u64,
    pub failed_constructs: u64,
    pub failed_reloads: u64,
    pub evictions: u64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of acquires served by an existing slot
    pub fn hit_ratio(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}
