//! Tunables for the dispatch cache, readable from a `config::Config`.

/// Eviction and capacity tuning for a [`DispatchRoot`](crate::cache::DispatchRoot).
#[derive(Copy, Clone, Debug)]
pub struct DispatchConfig {
    /// Cache capacity at which the eviction controller kicks in.
    pub max_passes: usize,
    /// Minimum age (in frames) a record must reach before it is eligible for eviction.
    pub min_age: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            max_passes: 100,
            min_age: 10,
        }
    }
}

impl DispatchConfig {
    /// Reads `dispatch.max_passes` / `dispatch.min_age` out of a `config::Config`,
    /// falling back to [`Default::default`] for keys that are absent or of the
    /// wrong type.
    pub fn from_config(cfg: &config::Config) -> DispatchConfig {
        let default = DispatchConfig::default();
        DispatchConfig {
            max_passes: cfg
                .get::<i64>("dispatch.max_passes")
                .map(|v| v as usize)
                .unwrap_or(default.max_passes),
            min_age: cfg
                .get::<i64>("dispatch.min_age")
                .map(|v| v as u32)
                .unwrap_or(default.min_age),
        }
    }
}
