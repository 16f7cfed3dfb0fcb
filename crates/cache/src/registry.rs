//! Texture registries and GPU resource deletion
//!
//! A registry owns the client id namespace of one context and the GPU
//! objects of its live textures. The discardable cache borrows a registry for
//! the duration of a lock or unlock to move texture objects in and out of it,
//! and gets notified by the registry when a texture is resized or deleted or
//! when the registry itself goes away.

use std::collections::HashMap;

use crate::discardable::DiscardableTextureCache;
use crate::texture::{ClientId, GpuTexture, RegistryId, ServiceId};

/// The registry side of the ownership hand-off.
pub trait TextureRegistry {
    /// Identity of this registry's client id namespace.
    fn registry_id(&self) -> RegistryId;

    /// The live texture registered under `client_id`, if any.
    fn texture(&self, client_id: ClientId) -> Option<&GpuTexture>;

    /// Remove the texture from the live set and hand it to the cache.
    fn take_texture(&mut self, client_id: ClientId) -> Option<GpuTexture>;

    /// Give a texture previously taken by the cache back to the live set.
    fn return_texture(&mut self, client_id: ClientId, texture: GpuTexture);
}

/// Destroys the GPU object behind a texture (`glDeleteTextures` and friends).
///
/// Deletion is fire-and-forget; there is no error to report back.
pub trait GpuResourceDeleter {
    fn delete_texture(&mut self, texture: GpuTexture);
}

impl<F: FnMut(GpuTexture)> GpuResourceDeleter for F {
    fn delete_texture(&mut self, texture: GpuTexture) {
        self(texture)
    }
}

/// In-memory texture registry
///
/// Maps client ids to live textures and keeps the discardable cache informed
/// of resizes and deletions. Live textures left when the table is dropped are
/// deleted through its deleter.
///
/// A table that inserted into a cache must be torn down with
/// [`TextureTable::destroy`]. Dropping it directly leaves its entries in the
/// cache, where locked ones keep counting against the limit.
pub struct TextureTable {
    id: RegistryId,
    textures: HashMap<ClientId, GpuTexture>,
    deleter: Box<dyn GpuResourceDeleter>,
    destroyed: bool,
}

impl TextureTable {
    pub fn new(deleter: impl GpuResourceDeleter + 'static) -> Self {
        Self {
            id: RegistryId::next(),
            textures: HashMap::new(),
            deleter: Box::new(deleter),
            destroyed: false,
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    /// Register a new texture object under `client_id`.
    ///
    /// Returns false and leaves the table unchanged if a live texture is
    /// already registered under that id.
    pub fn create_texture(&mut self, client_id: ClientId, service_id: ServiceId) -> bool {
        if self.textures.contains_key(&client_id) {
            return false;
        }
        self.textures
            .insert(client_id, GpuTexture::from_service_id(service_id));
        true
    }

    /// Delete the client id. The live texture, if any, is deleted here;
    /// the cache drops its entry and anything it held for the id.
    pub fn remove_texture(
        &mut self,
        client_id: ClientId,
        cache: &mut DiscardableTextureCache,
    ) -> bool {
        let removed = self.textures.remove(&client_id);
        cache.on_texture_deleted(self.id, client_id);
        match removed {
            Some(texture) => {
                self.deleter.delete_texture(texture);
                true
            }
            None => false,
        }
    }

    /// Redefine level 0 of a live texture and report the new size.
    pub fn set_level_info(
        &mut self,
        client_id: ClientId,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        cache: &mut DiscardableTextureCache,
    ) -> bool {
        let Some(texture) = self.textures.get_mut(&client_id) else {
            return false;
        };
        let size = texture.set_level_info(width, height, bytes_per_pixel);
        cache.on_texture_size_changed(self.id, client_id, size);
        true
    }

    /// Number of live textures.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Tear the registry down. The cache forgets every entry of this table
    /// before the live textures are deleted.
    pub fn destroy(mut self, cache: &mut DiscardableTextureCache) {
        cache.on_registry_destroyed(self.id);
        self.destroyed = true;
    }

    /// True once the cache has been told this table is gone.
    fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl TextureRegistry for TextureTable {
    fn registry_id(&self) -> RegistryId {
        self.id
    }

    fn texture(&self, client_id: ClientId) -> Option<&GpuTexture> {
        self.textures.get(&client_id)
    }

    fn take_texture(&mut self, client_id: ClientId) -> Option<GpuTexture> {
        self.textures.remove(&client_id)
    }

    fn return_texture(&mut self, client_id: ClientId, texture: GpuTexture) {
        self.textures.insert(client_id, texture);
    }
}

impl Drop for TextureTable {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            log::warn!(
                "{} dropped without destroy; its cache entries are left behind",
                self.id
            );
        }
        let mut live: Vec<(ClientId, GpuTexture)> = self.textures.drain().collect();
        live.sort_by_key(|(client_id, _)| *client_id);
        for (_, texture) in live {
            self.deleter.delete_texture(texture);
        }
    }
}

impl std::fmt::Debug for TextureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureTable")
            .field("id", &self.id)
            .field("textures", &self.textures.len())
            .finish_non_exhaustive()
    }
}
