//! Budget policy for the discardable cache
//!
//! The cache limit starts at a minimum and grows by a fixed increment for
//! every additional texture registry (context) that inserts into the cache,
//! up to a maximum. The limit never shrinks; memory pressure lowers the
//! target of a single eviction pass instead.

use std::collections::HashSet;

use crate::config::CacheConfig;
use crate::texture::RegistryId;

/// Memory pressure level reported by the embedder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// No action needed
    Low,
    /// Trim the cache to half of its limit
    Moderate,
    /// Trim the cache to a quarter of its limit
    High,
    /// Drop everything that can be dropped
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Size the cache should be trimmed to under this pressure, or `None` if
    /// no trimming is needed.
    pub fn trim_target(&self, limit: usize) -> Option<usize> {
        match self {
            MemoryPressure::Low => None,
            MemoryPressure::Moderate => Some(limit / 2),
            MemoryPressure::High => Some(limit / 4),
            MemoryPressure::Critical => Some(0),
        }
    }
}

/// Min/max/growth limits plus the set of registries seen so far.
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    min: usize,
    max: usize,
    growth: usize,
    limit: usize,
    registries: HashSet<RegistryId>,
}

impl BudgetPolicy {
    /// Create a policy. `max` is raised to `min` if smaller.
    pub fn new(min: usize, max: usize, growth: usize) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            growth,
            limit: min,
            registries: HashSet::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.min_cache_size,
            config.max_cache_size,
            config.cache_size_growth,
        )
    }

    /// Current cache limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn growth(&self) -> usize {
        self.growth
    }

    /// Number of distinct registries that ever inserted an entry.
    pub fn registry_count(&self) -> usize {
        self.registries.len()
    }

    /// Record that `registry` inserted an entry.
    ///
    /// Returns true if the limit grew. The first registry is covered by the
    /// minimum; each later, previously unseen one adds one growth step.
    pub fn note_registry(&mut self, registry: RegistryId) -> bool {
        if !self.registries.insert(registry) {
            return false;
        }
        if self.registries.len() == 1 {
            return false;
        }
        let grown = self.limit.saturating_add(self.growth).min(self.max);
        let changed = grown > self.limit;
        self.limit = grown;
        changed
    }

    /// Replace the limits and recompute the current limit from the
    /// registries already seen.
    pub fn set_limits(&mut self, min: usize, max: usize, growth: usize) {
        self.min = min;
        self.max = max.max(min);
        self.growth = growth;
        let extra_registries = self.registries.len().saturating_sub(1);
        self.limit = growth
            .saturating_mul(extra_registries)
            .saturating_add(min)
            .min(self.max);
    }
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_pressure_from_utilization() {
        assert_eq!(MemoryPressure::from_utilization(0.1), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.6), MemoryPressure::Moderate);
        assert_eq!(MemoryPressure::from_utilization(0.8), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_utilization(0.95), MemoryPressure::Critical);
    }

    #[test]
    fn test_trim_targets() {
        assert_eq!(MemoryPressure::Low.trim_target(8 * MB), None);
        assert_eq!(MemoryPressure::Moderate.trim_target(8 * MB), Some(4 * MB));
        assert_eq!(MemoryPressure::High.trim_target(8 * MB), Some(2 * MB));
        assert_eq!(MemoryPressure::Critical.trim_target(8 * MB), Some(0));
    }

    #[test]
    fn test_first_registry_keeps_min() {
        let mut policy = BudgetPolicy::new(MB, 2 * MB, MB);
        assert!(!policy.note_registry(RegistryId::next()));
        assert_eq!(policy.limit(), MB);
    }

    #[test]
    fn test_growth_capped_at_max() {
        let mut policy = BudgetPolicy::new(MB, 2 * MB, MB);
        let first = RegistryId::next();
        policy.note_registry(first);
        assert!(policy.note_registry(RegistryId::next()));
        assert_eq!(policy.limit(), 2 * MB);

        assert!(!policy.note_registry(RegistryId::next()));
        assert_eq!(policy.limit(), 2 * MB);
        assert_eq!(policy.registry_count(), 3);
    }

    #[test]
    fn test_known_registry_does_not_grow() {
        let mut policy = BudgetPolicy::new(MB, 4 * MB, MB);
        let first = RegistryId::next();
        let second = RegistryId::next();
        policy.note_registry(first);
        policy.note_registry(second);
        assert!(!policy.note_registry(second));
        assert!(!policy.note_registry(first));
        assert_eq!(policy.limit(), 2 * MB);
    }

    #[test]
    fn test_zero_growth() {
        let mut policy = BudgetPolicy::new(4 * MB, 4 * MB, 0);
        policy.note_registry(RegistryId::next());
        policy.note_registry(RegistryId::next());
        assert_eq!(policy.limit(), 4 * MB);
    }

    #[test]
    fn test_set_limits_accounts_for_seen_registries() {
        let mut policy = BudgetPolicy::new(MB, MB, 0);
        policy.note_registry(RegistryId::next());
        policy.note_registry(RegistryId::next());
        policy.note_registry(RegistryId::next());
        assert_eq!(policy.limit(), MB);

        policy.set_limits(MB, 8 * MB, MB);
        assert_eq!(policy.limit(), 3 * MB);
    }

    #[test]
    fn test_max_below_min_is_raised() {
        let policy = BudgetPolicy::new(4 * MB, MB, 0);
        assert_eq!(policy.max(), 4 * MB);
        assert_eq!(policy.limit(), 4 * MB);
    }
}
