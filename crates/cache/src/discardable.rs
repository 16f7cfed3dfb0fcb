//! Discardable texture cache with LRU eviction
//!
//! Tracks discardable textures of one or more texture registries. A locked
//! texture lives in its registry; once the last service lock is released the
//! cache takes the GPU object out of the registry and holds it until the
//! texture is locked again or evicted. Eviction deletes unlocked textures in
//! least recently used order while the tracked size exceeds the limit.
//!
//! The cache is driven from the thread that processes GPU commands for its
//! registries and does no locking of its own. The only state it shares with
//! other threads or processes is the lock count behind each handle.

use std::collections::{HashMap, HashSet};

use crate::budget::{BudgetPolicy, MemoryPressure};
use crate::config::CacheConfig;
use crate::handle::ServiceDiscardableHandle;
use crate::lru::LruList;
use crate::registry::{GpuResourceDeleter, TextureRegistry};
use crate::texture::{ClientId, GpuTexture, RegistryId, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EntryKey {
    registry: RegistryId,
    client_id: ClientId,
}

impl EntryKey {
    fn new(registry: RegistryId, client_id: ClientId) -> Self {
        Self {
            registry,
            client_id,
        }
    }
}

/// One discardable texture tracked by the cache.
#[derive(Debug)]
struct CacheEntry {
    handle: ServiceDiscardableHandle,
    size: usize,
    /// Locks held by the service side. Ownership moves to the cache when
    /// this drops to zero and back to the registry when it leaves zero.
    service_locks: u32,
    /// Set exactly while the cache owns the texture.
    unlocked_texture: Option<GpuTexture>,
}

impl CacheEntry {
    fn is_evictable(&self) -> bool {
        self.service_locks == 0 && self.unlocked_texture.is_some()
    }
}

/// Outcome of [`DiscardableTextureCache::unlock_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockResult {
    /// No entry for this texture, or it had no service lock left.
    NotFound,
    /// The entry is still locked by another service lock.
    StillLocked,
    /// The last service lock was released and the cache took the texture.
    /// The caller should unbind it from any texture units.
    Unlocked { texture_to_unbind: ServiceId },
}

impl UnlockResult {
    pub fn is_found(&self) -> bool {
        !matches!(self, UnlockResult::NotFound)
    }

    pub fn texture_to_unbind(&self) -> Option<ServiceId> {
        match self {
            UnlockResult::Unlocked { texture_to_unbind } => Some(*texture_to_unbind),
            _ => None,
        }
    }
}

/// Statistics about discardable cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardableCacheStats {
    /// Number of entries, locked or not
    pub entry_count: usize,

    /// Entries currently held by a service lock
    pub locked_count: usize,

    /// Sum of all entry sizes (bytes)
    pub total_size: usize,

    /// Current cache limit (bytes)
    pub limit: usize,

    /// Number of textures evicted and deleted by the cache
    pub evictions: u64,

    /// Bytes released by evictions
    pub bytes_evicted: u64,
}

impl DiscardableCacheStats {
    /// Tracked size relative to the limit (may exceed 1.0 while locked
    /// textures alone exceed it)
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.total_size as f64 / self.limit as f64
        }
    }

    /// Pressure level implied by the current utilization
    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization())
    }
}

/// Discardable GPU texture cache
///
/// # Example
///
/// ```
/// use discardable_gpu_cache::{
///     create_locked_handles, DiscardableTextureCache, GpuTexture, ServiceId, TextureRegistry,
///     TextureTable, UnlockResult,
/// };
///
/// let mut cache = DiscardableTextureCache::with_deleter(|_texture: GpuTexture| {});
/// let mut table = TextureTable::new(|_texture: GpuTexture| {});
///
/// table.create_texture(1, ServiceId(10));
/// let (client, service) = create_locked_handles();
/// cache.insert_locked_texture(&table, 1, 1024, service);
///
/// // Unlocking hands the texture to the cache.
/// let result = cache.unlock_texture(&mut table, 1);
/// assert_eq!(result, UnlockResult::Unlocked { texture_to_unbind: ServiceId(10) });
/// assert!(table.texture(1).is_none());
///
/// // The client locks first, then the service takes it back.
/// assert!(client.lock());
/// cache.lock_texture(&mut table, 1);
/// assert!(table.texture(1).is_some());
///
/// table.destroy(&mut cache);
/// ```
pub struct DiscardableTextureCache {
    entries: HashMap<EntryKey, CacheEntry>,
    lru: LruList<EntryKey>,
    by_registry: HashMap<RegistryId, HashSet<ClientId>>,
    budget: BudgetPolicy,
    total_size: usize,
    deleter: Box<dyn GpuResourceDeleter>,
    evictions: u64,
    bytes_evicted: u64,
}

impl DiscardableTextureCache {
    /// Create a cache with the given limits. `deleter` destroys the GPU
    /// objects of textures the cache evicts or drops.
    pub fn new(config: &CacheConfig, deleter: impl GpuResourceDeleter + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruList::new(),
            by_registry: HashMap::new(),
            budget: BudgetPolicy::from_config(config),
            total_size: 0,
            deleter: Box::new(deleter),
            evictions: 0,
            bytes_evicted: 0,
        }
    }

    /// Create a cache with the default limits.
    pub fn with_deleter(deleter: impl GpuResourceDeleter + 'static) -> Self {
        Self::new(&CacheConfig::default(), deleter)
    }

    /// Start tracking a texture the registry currently owns.
    ///
    /// The entry starts locked once. If an entry already exists for this
    /// texture it is replaced; a stale texture the cache held for it is
    /// deleted. A registry inserting for the first time may grow the limit.
    pub fn insert_locked_texture<R: TextureRegistry + ?Sized>(
        &mut self,
        registry: &R,
        client_id: ClientId,
        size: usize,
        handle: ServiceDiscardableHandle,
    ) {
        let registry_id = registry.registry_id();
        let key = EntryKey::new(registry_id, client_id);
        debug_assert!(
            registry.texture(client_id).is_some(),
            "inserted texture must be owned by its registry"
        );

        if let Some(mut old) = self.remove_entry(&key) {
            if !old.handle.shares_count_with(&handle) {
                old.handle.force_delete();
            }
            if let Some(stale) = old.unlocked_texture.take() {
                log::debug!(
                    "re-insert of texture {} in {} deletes stale {}",
                    client_id,
                    registry_id,
                    stale.service_id()
                );
                self.deleter.delete_texture(stale);
            }
        }

        if self.budget.note_registry(registry_id) {
            log::debug!(
                "discardable cache limit grew to {} bytes ({} registries)",
                self.budget.limit(),
                self.budget.registry_count()
            );
        }

        self.total_size += size;
        self.entries.insert(
            key,
            CacheEntry {
                handle,
                size,
                service_locks: 1,
                unlocked_texture: None,
            },
        );
        self.by_registry
            .entry(registry_id)
            .or_default()
            .insert(client_id);
        self.lru.touch(key);

        self.enforce_limits(self.budget.limit());
    }

    /// Release one service lock.
    ///
    /// When the last lock goes, the texture is taken out of the registry and
    /// held by the cache, and the limit is enforced.
    pub fn unlock_texture<R: TextureRegistry + ?Sized>(
        &mut self,
        registry: &mut R,
        client_id: ClientId,
    ) -> UnlockResult {
        let key = EntryKey::new(registry.registry_id(), client_id);
        let Some(entry) = self.entries.get_mut(&key) else {
            log::trace!("unlock of untracked texture {}", client_id);
            return UnlockResult::NotFound;
        };
        if entry.service_locks == 0 {
            log::trace!("unlock of texture {} without a service lock", client_id);
            return UnlockResult::NotFound;
        }

        entry.handle.unlock();
        entry.service_locks -= 1;
        self.lru.touch(key);
        if entry.service_locks > 0 {
            return UnlockResult::StillLocked;
        }

        let Some(texture) = registry.take_texture(client_id) else {
            log::warn!(
                "{} lost texture {} while it was locked; dropping entry",
                key.registry,
                client_id
            );
            self.remove_entry(&key);
            return UnlockResult::NotFound;
        };

        let texture_to_unbind = texture.service_id();
        log::trace!("cache took ownership of {}", texture_to_unbind);
        entry.unlocked_texture = Some(texture);

        self.enforce_limits(self.budget.limit());
        UnlockResult::Unlocked { texture_to_unbind }
    }

    /// Take one service lock.
    ///
    /// On the transition out of the unlocked state the held texture is given
    /// back to the registry, unless the registry has meanwhile created a
    /// different object under the same client id. In that case the held one
    /// is orphaned and gets deleted. Returns false if there is no entry.
    pub fn lock_texture<R: TextureRegistry + ?Sized>(
        &mut self,
        registry: &mut R,
        client_id: ClientId,
    ) -> bool {
        let key = EntryKey::new(registry.registry_id(), client_id);
        let Some(entry) = self.entries.get_mut(&key) else {
            log::trace!("lock of untracked texture {}", client_id);
            return false;
        };

        entry.service_locks += 1;
        let Some(texture) = entry.unlocked_texture.take() else {
            return true;
        };

        match registry.texture(client_id) {
            None => {
                log::trace!("returning {} to {}", texture.service_id(), key.registry);
                registry.return_texture(client_id, texture);
            }
            Some(live) if live.is_same_object(&texture) => {
                log::warn!(
                    "{} already holds {} that the cache owned",
                    key.registry,
                    texture.service_id()
                );
            }
            Some(live) => {
                log::debug!(
                    "texture {} was regenerated as {}; deleting orphaned {}",
                    client_id,
                    live.service_id(),
                    texture.service_id()
                );
                self.deleter.delete_texture(texture);
            }
        }
        true
    }

    /// The registry redefined the storage of a texture.
    pub fn on_texture_size_changed(
        &mut self,
        registry: RegistryId,
        client_id: ClientId,
        new_size: usize,
    ) {
        let key = EntryKey::new(registry, client_id);
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        self.total_size = self.total_size - entry.size + new_size;
        entry.size = new_size;

        self.enforce_limits(self.budget.limit());
    }

    /// The registry deleted a client id. The entry goes away, and a texture
    /// the cache still held for it is deleted.
    pub fn on_texture_deleted(&mut self, registry: RegistryId, client_id: ClientId) {
        let key = EntryKey::new(registry, client_id);
        if let Some(mut entry) = self.remove_entry(&key) {
            if let Some(texture) = entry.unlocked_texture.take() {
                self.deleter.delete_texture(texture);
            }
        }
    }

    /// The registry is going away. All of its entries are removed; textures
    /// the cache held are deleted, textures the registry holds are left for
    /// the registry to delete.
    pub fn on_registry_destroyed(&mut self, registry: RegistryId) {
        let Some(client_ids) = self.by_registry.get(&registry) else {
            return;
        };
        let keys: Vec<EntryKey> = self
            .lru
            .iter()
            .filter(|key| key.registry == registry && client_ids.contains(&key.client_id))
            .copied()
            .collect();

        let mut deleted = 0;
        for key in &keys {
            if let Some(mut entry) = self.remove_entry(key) {
                entry.handle.force_delete();
                if let Some(texture) = entry.unlocked_texture.take() {
                    self.deleter.delete_texture(texture);
                    deleted += 1;
                }
            }
        }
        self.by_registry.remove(&registry);

        log::debug!(
            "{} destroyed: removed {} entries, deleted {} unlocked textures",
            registry,
            keys.len(),
            deleted
        );
    }

    /// Trim the cache in response to memory pressure. The limit itself is
    /// left unchanged.
    pub fn handle_memory_pressure(&mut self, pressure: MemoryPressure) {
        if let Some(target) = pressure.trim_target(self.budget.limit()) {
            log::debug!("memory pressure {:?}: trimming to {} bytes", pressure, target);
            self.enforce_limits(target);
        }
    }

    /// Replace the limits and enforce the resulting limit.
    pub fn set_limits(&mut self, min: usize, max: usize, growth: usize) {
        self.budget.set_limits(min, max, growth);
        self.enforce_limits(self.budget.limit());
    }

    /// Number of entries, locked or not.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all entry sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Current cache limit in bytes.
    pub fn limit(&self) -> usize {
        self.budget.limit()
    }

    pub fn budget(&self) -> &BudgetPolicy {
        &self.budget
    }

    pub fn contains(&self, registry: RegistryId, client_id: ClientId) -> bool {
        self.entries
            .contains_key(&EntryKey::new(registry, client_id))
    }

    /// True if the shared handle of the entry is locked by the client or the
    /// service. False for unknown textures.
    pub fn is_entry_locked(&self, registry: RegistryId, client_id: ClientId) -> bool {
        self.entries
            .get(&EntryKey::new(registry, client_id))
            .is_some_and(|entry| entry.handle.is_locked_by_client_or_service())
    }

    /// The texture the cache holds for an unlocked entry.
    pub fn unlocked_texture(&self, registry: RegistryId, client_id: ClientId) -> Option<&GpuTexture> {
        self.entries
            .get(&EntryKey::new(registry, client_id))
            .and_then(|entry| entry.unlocked_texture.as_ref())
    }

    /// Get current cache statistics
    pub fn stats(&self) -> DiscardableCacheStats {
        DiscardableCacheStats {
            entry_count: self.entries.len(),
            locked_count: self
                .entries
                .values()
                .filter(|entry| entry.service_locks > 0)
                .count(),
            total_size: self.total_size,
            limit: self.budget.limit(),
            evictions: self.evictions,
            bytes_evicted: self.bytes_evicted,
        }
    }

    fn remove_entry(&mut self, key: &EntryKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        if let Some(ids) = self.by_registry.get_mut(&key.registry) {
            ids.remove(&key.client_id);
            if ids.is_empty() {
                self.by_registry.remove(&key.registry);
            }
        }
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Evict unlocked entries, oldest first, until the tracked size fits
    /// `limit` or nothing evictable is left.
    fn enforce_limits(&mut self, limit: usize) {
        debug_assert_eq!(self.lru.len(), self.entries.len());
        if self.total_size <= limit {
            return;
        }

        let mut remaining = self.total_size;
        let mut victims = Vec::new();
        for key in self.lru.iter() {
            if remaining <= limit {
                break;
            }
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            // The handle moves to the deleted state here, so a client that
            // relocked it in shared memory keeps the entry alive.
            if !entry.is_evictable() || !entry.handle.try_delete() {
                continue;
            }
            remaining -= entry.size;
            victims.push(*key);
        }

        for key in victims {
            let Some(mut entry) = self.remove_entry(&key) else {
                continue;
            };
            self.evictions += 1;
            self.bytes_evicted += entry.size as u64;
            if let Some(texture) = entry.unlocked_texture.take() {
                log::debug!(
                    "evicting texture {} ({}) of {}, {} bytes",
                    key.client_id,
                    texture.service_id(),
                    key.registry,
                    entry.size
                );
                self.deleter.delete_texture(texture);
            }
        }
    }
}

impl Drop for DiscardableTextureCache {
    fn drop(&mut self) {
        let keys: Vec<EntryKey> = self.lru.iter().copied().collect();
        for key in keys {
            if let Some(mut entry) = self.entries.remove(&key) {
                entry.handle.force_delete();
                if let Some(texture) = entry.unlocked_texture.take() {
                    self.deleter.delete_texture(texture);
                }
            }
        }
    }
}

impl std::fmt::Debug for DiscardableTextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscardableTextureCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
