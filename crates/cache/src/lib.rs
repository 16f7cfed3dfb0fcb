//! Discardable GPU Texture Cache
//!
//! Lock/unlock texture cache for a GPU command service. Unlocked textures
//! are owned by the cache and evicted in LRU order when the tracked size
//! exceeds a limit that grows with the number of texture registries.

pub mod budget;
pub mod config;
pub mod discardable;
pub mod handle;
mod lru;
pub mod registry;
pub mod texture;

pub use budget::{BudgetPolicy, MemoryPressure};
pub use config::{CacheConfig, ConfigError};
pub use discardable::{DiscardableCacheStats, DiscardableTextureCache, UnlockResult};
pub use handle::{
    create_locked_handles, ClientDiscardableHandle, ServiceDiscardableHandle, SharedLockCount,
};
pub use registry::{GpuResourceDeleter, TextureRegistry, TextureTable};
pub use texture::{ClientId, GpuTexture, RegistryId, ServiceId};
