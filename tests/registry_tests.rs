//! Integration tests for buffer type registration and lookup.

use sigbuf::prelude::*;
use std::sync::Arc;
use std::thread;

fn rejecting_factory() -> BufferFactory {
    BufferFactory::new(|_, _, _, _, _| Err(Error::Unsupported("rejecting factory".into())))
}

/// The built-in host types are always available from the global registry.
#[test]
fn test_global_registry_serves_host_storage() {
    let registry = BufferTypeRegistry::global();
    for buffer_type in [BufferType::host(), BufferType::pinned_host()] {
        let factory = registry.lookup(&buffer_type).unwrap();
        let buffer = factory
            .make(100, 8, 4, &ProducerInfo::new("src"), &BufferOwner::new("src"))
            .unwrap();
        assert_eq!(buffer.capacity(), 100);
        assert_eq!(buffer.item_size(), 8);
        assert_eq!(buffer.context(), BufferContext::HostToHost);
    }
}

/// Re-registering an existing type is rejected and the original factory stays.
#[test]
fn test_duplicate_host_registration_rejected() {
    let registry = BufferTypeRegistry::with_builtin_types();
    let original = registry.lookup(&BufferType::host()).unwrap();

    assert!(!registry.register(BufferType::host(), rejecting_factory()));
    let current = registry.lookup(&BufferType::host()).unwrap();
    assert!(current.ptr_eq(&original));
    assert!(
        current
            .make(16, 4, 1, &ProducerInfo::default(), &BufferOwner::default())
            .is_ok()
    );
}

/// A type with the same name but a fresh identity is a different type.
#[test]
fn test_same_name_is_distinct_type() {
    let registry = BufferTypeRegistry::with_builtin_types();
    let impostor = BufferType::new("host");
    assert!(registry.register(impostor.clone(), rejecting_factory()));
    assert_eq!(registry.len(), 3);

    let err = registry
        .lookup(&impostor)
        .unwrap()
        .make(16, 4, 1, &ProducerInfo::default(), &BufferOwner::default())
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

/// Device types are registered under their own name and allocate through
/// the device for every context.
#[test]
fn test_register_device_type() {
    let registry = BufferTypeRegistry::with_builtin_types();
    let device = Arc::new(EmulatedDevice::new("emu0"));
    let device_type = registry.register_device("emu0", device.clone()).unwrap();

    assert_eq!(device_type.name(), "emu0");
    assert_eq!(registry.lookup_by_name("emu0"), Some(device_type.clone()));
    assert!(registry.register_device("emu0", device.clone()).is_none());

    let factory = registry.lookup(&device_type).unwrap();
    let owner = BufferOwner::new("fft").with_context(BufferContext::DeviceToDevice);
    let buffer = factory
        .make(64, 4, 1, &ProducerInfo::new("fft"), &owner)
        .unwrap();
    assert_eq!(buffer.context(), BufferContext::DeviceToDevice);
    assert_eq!(device.allocation_count(), 1);

    drop(buffer);
    assert_eq!(device.allocation_count(), 0);
}

/// Unregistered types can no longer be looked up.
#[test]
fn test_unregister() {
    let registry = BufferTypeRegistry::with_builtin_types();
    assert!(registry.unregister(&BufferType::pinned_host()));
    assert!(registry.lookup(&BufferType::pinned_host()).is_none());
    assert!(!registry.contains(&BufferType::pinned_host()));
    assert!(registry.contains(&BufferType::host()));
    assert_eq!(registry.types(), vec![BufferType::host()]);
}

/// Concurrent lookups and registrations do not interfere.
#[test]
fn test_concurrent_registration() {
    let registry = Arc::new(BufferTypeRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let buffer_type = BufferType::new(&format!("type{i}"));
                assert!(registry.register(buffer_type.clone(), rejecting_factory()));
                assert!(registry.lookup(&buffer_type).is_some());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.len(), 8);
}

/// Racing device registrations under one name admit exactly one type.
#[test]
fn test_concurrent_device_registration_same_name() {
    for _ in 0..50 {
        let registry = Arc::new(BufferTypeRegistry::new());
        let device = Arc::new(EmulatedDevice::new("emu"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let device = device.clone();
                thread::spawn(move || registry.register_device("emu", device).is_some())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }
}
