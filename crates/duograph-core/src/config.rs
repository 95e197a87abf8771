//! Configuration for the DuoGraph engine.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of significant edits kept in the undo history.
    /// Oldest entries are discarded past this depth.
    pub history_limit: usize,
    /// Initial capacity hint for the vertex and edge arenas.
    pub initial_capacity: usize,
}

impl EngineConfig {
    /// Interactive preset: deep undo history for a desktop host.
    pub fn interactive() -> Self {
        Self {
            history_limit: 100,
            initial_capacity: 256,
        }
    }

    /// Batch preset: shallow history, large arenas for bulk loading.
    pub fn batch() -> Self {
        Self {
            history_limit: 4,
            initial_capacity: 16 * 1024,
        }
    }

    /// Validate all configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_limit == 0 {
            return Err("history_limit must be > 0".into());
        }
        if self.initial_capacity > 64 * 1024 * 1024 {
            return Err("initial_capacity must be <= 64M elements".into());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::interactive()
    }
}
