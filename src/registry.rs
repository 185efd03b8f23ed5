//! Buffer type registry: storage strategies selected by identity.
//!
//! A producing stage asks for storage by [`BufferType`]; the registry hands
//! back the matching [`BufferFactory`], which allocates the buffer through
//! some backend. Plain host storage is always registered in the global
//! registry; device backends add their own types at startup.
//!
//! Registration is a startup activity. Lookups take a read lock and clone an
//! `Arc`, which is cheap but not meant for a per-item hot path.
//!
//! # Example
//!
//! ```rust
//! use sigbuf::buffer::{BufferOwner, ProducerInfo};
//! use sigbuf::registry::{BufferType, BufferTypeRegistry};
//!
//! let factory = BufferTypeRegistry::global()
//!     .lookup(&BufferType::host())
//!     .expect("host storage is always registered");
//! let buffer = factory
//!     .make(4096, 8, 1, &ProducerInfo::new("src"), &BufferOwner::new("src"))
//!     .unwrap();
//! assert_eq!(buffer.capacity(), 4096);
//! ```

use crate::backend::{BufferBackend, DeviceBackend, HostBackend};
use crate::buffer::{Buffer, BufferOwner, BufferRequest, MappingType, ProducerInfo};
use crate::device::DeviceMemory;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

static NEXT_ORDINAL: AtomicU32 = AtomicU32::new(0);

// ============================================================================
// Buffer Type
// ============================================================================

/// Identity of a buffer storage strategy.
///
/// Every call to [`BufferType::new`] creates a distinct identity, even for
/// equal names. Identities compare and hash by ordinal and have
/// no ordering.
#[derive(Debug, Clone)]
pub struct BufferType {
    name: Arc<str>,
    ordinal: u32,
}

impl BufferType {
    /// Create a fresh identity.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            ordinal: NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Heap-backed host storage.
    pub fn host() -> Self {
        static HOST: OnceLock<BufferType> = OnceLock::new();
        HOST.get_or_init(|| BufferType::new("host")).clone()
    }

    /// Page-locked host storage.
    pub fn pinned_host() -> Self {
        static PINNED: OnceLock<BufferType> = OnceLock::new();
        PINNED.get_or_init(|| BufferType::new("pinned_host")).clone()
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process-unique ordinal.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
}

impl PartialEq for BufferType {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal
    }
}

impl Eq for BufferType {}

impl Hash for BufferType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordinal.hash(state);
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Factory
// ============================================================================

type MakeFn = dyn Fn(usize, usize, usize, &ProducerInfo, &BufferOwner) -> Result<Arc<Buffer>>
    + Send
    + Sync;

/// Constructs buffers of one type.
///
/// Arguments of [`BufferFactory::make`] are the requested capacity in items,
/// the item size, the downstream read granularity, the producer and the
/// owner.
#[derive(Clone)]
pub struct BufferFactory {
    make: Arc<MakeFn>,
}

impl BufferFactory {
    /// Wrap a construction function.
    pub fn new<F>(make: F) -> Self
    where
        F: Fn(usize, usize, usize, &ProducerInfo, &BufferOwner) -> Result<Arc<Buffer>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    /// A factory allocating single-mapped buffers through `backend`.
    pub fn from_backend(backend: Arc<dyn BufferBackend>) -> Self {
        Self::new(move |nitems, item_size, downstream_lcm, producer, owner| {
            let request = BufferRequest::new(nitems, item_size)
                .with_downstream_lcm(downstream_lcm)
                .with_producer(producer.clone())
                .with_owner(owner.clone())
                .with_mapping(MappingType::SingleMapped);
            Buffer::allocate(backend.as_ref(), &request)
        })
    }

    /// Construct a buffer.
    pub fn make(
        &self,
        capacity_items: usize,
        item_size: usize,
        downstream_lcm: usize,
        producer: &ProducerInfo,
        owner: &BufferOwner,
    ) -> Result<Arc<Buffer>> {
        (self.make)(capacity_items, item_size, downstream_lcm, producer, owner)
    }

    /// Whether two handles share the same underlying function.
    pub fn ptr_eq(&self, other: &BufferFactory) -> bool {
        Arc::ptr_eq(&self.make, &other.make)
    }
}

impl fmt::Debug for BufferFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferFactory").finish_non_exhaustive()
    }
}

/// A buffer type together with its factory.
#[derive(Debug, Clone)]
pub struct BufferTypeDescriptor {
    buffer_type: BufferType,
    factory: BufferFactory,
}

impl BufferTypeDescriptor {
    /// Pair an identity with a factory.
    pub fn new(buffer_type: BufferType, factory: BufferFactory) -> Self {
        Self {
            buffer_type,
            factory,
        }
    }

    /// The identity.
    pub fn buffer_type(&self) -> &BufferType {
        &self.buffer_type
    }

    /// The factory.
    pub fn factory(&self) -> &BufferFactory {
        &self.factory
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Thread-safe map from buffer type to factory.
pub struct BufferTypeRegistry {
    entries: RwLock<HashMap<BufferType, BufferTypeDescriptor>>,
}

impl BufferTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in host types.
    pub fn with_builtin_types() -> Self {
        let registry = Self::new();
        registry.register(
            BufferType::host(),
            BufferFactory::from_backend(Arc::new(HostBackend::heap())),
        );
        registry.register(
            BufferType::pinned_host(),
            BufferFactory::from_backend(Arc::new(HostBackend::pinned())),
        );
        registry
    }

    /// The process-wide registry, built with the host types on first use.
    pub fn global() -> &'static BufferTypeRegistry {
        static GLOBAL: OnceLock<BufferTypeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_builtin_types)
    }

    /// Register `factory` under `buffer_type`.
    ///
    /// Returns false, keeping the existing factory, if the type is already
    /// registered.
    pub fn register(&self, buffer_type: BufferType, factory: BufferFactory) -> bool {
        self.register_descriptor(BufferTypeDescriptor::new(buffer_type, factory))
    }

    /// Register a descriptor. Same rules as [`BufferTypeRegistry::register`].
    pub fn register_descriptor(&self, descriptor: BufferTypeDescriptor) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let buffer_type = descriptor.buffer_type.clone();
        if entries.contains_key(&buffer_type) {
            tracing::warn!(buffer_type = %buffer_type, "duplicate buffer type registration rejected");
            return false;
        }
        entries.insert(buffer_type.clone(), descriptor);
        tracing::debug!(buffer_type = %buffer_type, ordinal = buffer_type.ordinal(), "registered buffer type");
        true
    }

    /// Register a new buffer type named `name` backed by `device`.
    ///
    /// Returns `None` if a type with that name is already registered.
    pub fn register_device(&self, name: &str, device: Arc<dyn DeviceMemory>) -> Option<BufferType> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.keys().any(|t| t.name() == name) {
            tracing::warn!(name, "a buffer type with this name is already registered");
            return None;
        }
        let buffer_type = BufferType::new(name);
        let factory = BufferFactory::from_backend(Arc::new(DeviceBackend::new(device)));
        entries.insert(
            buffer_type.clone(),
            BufferTypeDescriptor::new(buffer_type.clone(), factory),
        );
        tracing::debug!(buffer_type = %buffer_type, ordinal = buffer_type.ordinal(), "registered device buffer type");
        Some(buffer_type)
    }

    /// The factory for `buffer_type`, if registered.
    pub fn lookup(&self, buffer_type: &BufferType) -> Option<BufferFactory> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(buffer_type).map(|d| d.factory.clone())
    }

    /// Find a registered type by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<BufferType> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().find(|t| t.name() == name).cloned()
    }

    /// Remove `buffer_type`. Returns whether it was registered.
    pub fn unregister(&self, buffer_type: &BufferType) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(buffer_type).is_some();
        if removed {
            tracing::debug!(buffer_type = %buffer_type, "unregistered buffer type");
        }
        removed
    }

    /// Whether `buffer_type` is registered.
    pub fn contains(&self, buffer_type: &BufferType) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(buffer_type)
    }

    /// All registered types.
    pub fn types(&self) -> Vec<BufferType> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.types().iter().map(|t| t.name().to_string()).collect();
        names.sort();
        f.debug_struct("BufferTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn failing_factory() -> BufferFactory {
        BufferFactory::new(|_, _, _, _, _| Err(Error::Unsupported("test".into())))
    }

    #[test]
    fn test_identity_is_by_ordinal() {
        let a = BufferType::new("dev");
        let b = BufferType::new("dev");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(BufferType::host(), BufferType::host());
        assert_eq!(BufferType::host().to_string(), "host");
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = BufferTypeRegistry::new();
        let ty = BufferType::new("custom");
        assert!(registry.lookup(&ty).is_none());
        assert!(registry.register(ty.clone(), failing_factory()));
        assert!(registry.contains(&ty));
        assert!(registry.lookup(&ty).is_some());
        assert_eq!(registry.lookup_by_name("custom"), Some(ty.clone()));
        assert!(registry.unregister(&ty));
        assert!(!registry.unregister(&ty));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_keeps_original() {
        let registry = BufferTypeRegistry::new();
        let ty = BufferType::new("dup");
        let original = failing_factory();
        assert!(registry.register(ty.clone(), original.clone()));
        assert!(!registry.register(ty.clone(), failing_factory()));
        assert!(registry.lookup(&ty).unwrap().ptr_eq(&original));
    }

    #[test]
    fn test_builtin_types() {
        let registry = BufferTypeRegistry::with_builtin_types();
        assert_eq!(registry.len(), 2);
        let buffer = registry
            .lookup(&BufferType::pinned_host())
            .unwrap()
            .make(64, 4, 1, &ProducerInfo::default(), &BufferOwner::default())
            .unwrap();
        assert_eq!(buffer.capacity(), 64);
    }

    #[test]
    fn test_global_has_host() {
        assert!(BufferTypeRegistry::global().contains(&BufferType::host()));
    }
}
