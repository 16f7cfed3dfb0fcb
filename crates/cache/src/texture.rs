//! Texture identifiers and the GPU texture object moved between a registry
//! and the discardable cache.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Client-assigned texture name, unique within one registry.
pub type ClientId = u32;

/// GPU-side name of a texture object.
///
/// Two textures with different service ids are different GPU objects even if
/// they were registered under the same client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u32);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service#{}", self.0)
    }
}

/// Identifies one texture registry (one context's client id namespace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryId(u32);

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(1);

impl RegistryId {
    /// Allocate a process-unique registry id.
    pub fn next() -> Self {
        Self(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry#{}", self.0)
    }
}

/// A GPU texture object
///
/// Owned by exactly one party at a time: the registry while the texture is
/// locked, the discardable cache while it is unlocked. It is deliberately not
/// `Clone`, so the hand-off between the two is a move.
pub struct GpuTexture {
    service_id: ServiceId,

    /// Opaque backend object (a Metal texture, a wgpu texture, ...)
    texture_handle: Box<dyn Any + Send>,

    /// Width of level 0 in pixels
    pub width: u32,

    /// Height of level 0 in pixels
    pub height: u32,

    byte_size: usize,
}

impl GpuTexture {
    /// Create a texture with no storage defined yet.
    pub fn new<T: 'static + Send>(service_id: ServiceId, texture_handle: T) -> Self {
        Self {
            service_id,
            texture_handle: Box::new(texture_handle),
            width: 0,
            height: 0,
            byte_size: 0,
        }
    }

    /// Create a texture backed by no backend object.
    ///
    /// Useful for registries that only track GPU names.
    pub fn from_service_id(service_id: ServiceId) -> Self {
        Self::new(service_id, ())
    }

    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Estimated GPU memory used by this texture in bytes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Redefine level 0 storage. Returns the new byte size.
    pub fn set_level_info(&mut self, width: u32, height: u32, bytes_per_pixel: u32) -> usize {
        self.width = width;
        self.height = height;
        self.byte_size = width as usize * height as usize * bytes_per_pixel as usize;
        self.byte_size
    }

    /// Get a reference to the underlying backend object
    ///
    /// Returns `None` if the type doesn't match.
    pub fn texture_handle<T: 'static>(&self) -> Option<&T> {
        self.texture_handle.downcast_ref::<T>()
    }

    /// True if both refer to the same GPU object.
    pub fn is_same_object(&self, other: &GpuTexture) -> bool {
        self.service_id == other.service_id
    }
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuTexture")
            .field("service_id", &self.service_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("byte_size", &self.byte_size)
            .finish_non_exhaustive()
    }
}
