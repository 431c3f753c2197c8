//! Lifecycle Tests - Process Lock Count, Teardown and Reference Ledgers
//!
//! These tests exercise the process-wide state owned by the runtime:
//! - Bring-up on the first initialize, teardown on the last uninitialize
//! - Teardown draining registrations, cached libraries and external pins
//! - External lock pins staying paired with object ownership references
//! - Library reaping and the running object table

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::*;
use combase::host::{register_inproc_server, CanUnloadNowFn, StaticLibraryLoader};
use combase::types::iid;
use combase::{ClsCtx, Clsid, ComError, ComPtr, ComRuntime, RegCls, ThreadingModel};

#[test]
fn test_teardown_drains_state() {
    init_logging();

    let loader = Arc::new(StaticLibraryLoader::new());
    let runtime = Arc::new(ComRuntime::builder().loader(loader.clone()).build());
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();

    // Registrations
    let factories: Vec<_> = (0..5).map(|_| CounterFactory::new()).collect();
    for factory in &factories {
        let ptr: ComPtr = factory.clone();
        runtime
            .register_class_object(&Clsid::generate(), &ptr, ClsCtx::INPROC_SERVER | ClsCtx::LOCAL_SERVER, RegCls::MULTIPLEUSE)
            .unwrap();
    }

    // Cached libraries
    let calls = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..3 {
        let path = format!("lib{}.dll", i);
        handles.push(loader.add_server_module(&path, serve_factory(CounterFactory::new(), calls.clone()), None));
        let clsid = Clsid::generate();
        register_inproc_server(runtime.store().as_ref(), &clsid, &path).unwrap();
        runtime.create_instance(&clsid, None, ClsCtx::INPROC_SERVER, &IID_COUNTER).unwrap();
    }

    // External pins, one of them taken from another thread
    let pinned: Vec<_> = (0..4).map(|_| Counter::new()).collect();
    for counter in &pinned {
        let ptr: ComPtr = counter.clone();
        runtime.lock_object_external(&ptr, true, false).unwrap();
        runtime.lock_object_external(&ptr, true, false).unwrap();
    }
    {
        let runtime = runtime.clone();
        let ptr: ComPtr = pinned[0].clone();
        thread::spawn(move || runtime.lock_object_external(&ptr, true, false).unwrap())
            .join()
            .unwrap();
    }

    println!("\n=== Teardown Test ===");
    println!("Registered classes: {}", runtime.registry().len());
    println!("Cached libraries: {}", runtime.libraries().len());
    println!("Pinned objects: {}", runtime.external_locks().len());
    assert_eq!(runtime.registry().len(), 5);
    assert_eq!(runtime.libraries().len(), 3);
    assert_eq!(runtime.external_locks().len(), 4);

    runtime.uninitialize().unwrap();

    assert!(runtime.registry().is_empty());
    assert!(runtime.libraries().is_empty());
    assert!(runtime.external_locks().is_empty());
    assert_eq!(loader.total_loads(), 0);
    assert!(handles.iter().all(|handle| loader.load_count(*handle) == 0));
    assert!(factories.iter().all(|factory| factory.refs() == 0));
    assert!(pinned.iter().all(|counter| counter.refs() == 0));
    assert!(!runtime.is_running());
}

#[test]
fn test_teardown_waits_for_last_thread() {
    init_logging();

    let runtime = Arc::new(ComRuntime::new());
    runtime.initialize(ThreadingModel::Multithreaded).unwrap();
    let factory: ComPtr = CounterFactory::new();
    let clsid = Clsid::generate();
    runtime
        .register_class_object(&clsid, &factory, ClsCtx::INPROC_SERVER, RegCls::MULTIPLEUSE)
        .unwrap();

    {
        let runtime = runtime.clone();
        thread::spawn(move || {
            runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
            runtime.uninitialize().unwrap();
        })
        .join()
        .unwrap();
    }

    // Another thread leaving does not tear the process down
    assert!(runtime.is_running());
    assert!(runtime.registry().contains(&clsid));
    runtime.get_class_object(&clsid, ClsCtx::INPROC_SERVER, &iid::ICLASSFACTORY).unwrap();

    runtime.uninitialize().unwrap();
    assert!(!runtime.registry().contains(&clsid));
}

#[test]
fn test_reinitialize_after_teardown() {
    init_logging();

    let runtime = ComRuntime::new();
    for round in 0..3 {
        runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
        let table = runtime.running_object_table().unwrap();
        assert!(table.is_empty(), "round {} saw stale running objects", round);

        let counter: ComPtr = Counter::new();
        table.register("counter", &counter).unwrap();
        assert!(matches!(
            table.register("counter", &counter),
            Err(ComError::ObjectAlreadyRegistered(_))
        ));

        runtime.uninitialize().unwrap();
        assert!(matches!(runtime.running_object_table(), Err(ComError::NotInitialized)));
    }
    assert_eq!(runtime.lock_count(), 0);
}

#[test]
fn test_external_locks_pair_with_references() {
    init_logging();

    let runtime = ComRuntime::new();
    let counter = Counter::new();
    let ptr: ComPtr = counter.clone();

    for expected in 1..=3 {
        runtime.lock_object_external(&ptr, true, false).unwrap();
        assert_eq!(runtime.external_locks().pins(&ptr), expected);
        assert_eq!(counter.refs(), expected);
    }

    runtime.lock_object_external(&ptr, false, false).unwrap();
    assert_eq!(runtime.external_locks().pins(&ptr), 2);
    assert_eq!(counter.refs(), 2);

    runtime.lock_object_external(&ptr, false, true).unwrap();
    assert_eq!(runtime.external_locks().pins(&ptr), 0);
    assert!(runtime.external_locks().is_empty());
    assert_eq!(counter.refs(), 0);

    // Unpinning something never pinned is a no-op
    runtime.lock_object_external(&ptr, false, true).unwrap();
    assert_eq!(counter.refs(), 0);
}

#[test]
fn test_free_unused_libraries_asks_each_library() {
    init_logging();

    let loader = Arc::new(StaticLibraryLoader::new());
    let runtime = ComRuntime::builder().loader(loader.clone()).build();
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();

    let busy = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicUsize::new(0));

    let query: CanUnloadNowFn = {
        let busy = busy.clone();
        Arc::new(move || !busy.load(Ordering::SeqCst))
    };
    let reapable = loader.add_server_module("reapable.dll", serve_factory(CounterFactory::new(), calls.clone()), Some(query));
    let silent = loader.add_server_module("silent.dll", serve_factory(CounterFactory::new(), calls.clone()), None);

    for path in ["reapable.dll", "silent.dll"] {
        let clsid = Clsid::generate();
        register_inproc_server(runtime.store().as_ref(), &clsid, path).unwrap();
        runtime.get_class_object(&clsid, ClsCtx::INPROC_SERVER, &iid::ICLASSFACTORY).unwrap();
    }
    assert_eq!(runtime.libraries().len(), 2);

    assert_eq!(runtime.free_unused_libraries(), 0);
    busy.store(false, Ordering::SeqCst);
    assert_eq!(runtime.free_unused_libraries(), 1);

    assert!(!runtime.libraries().contains(reapable));
    assert!(runtime.libraries().contains(silent));
    assert_eq!(loader.load_count(reapable), 0);
    assert_eq!(loader.load_count(silent), 1);

    runtime.uninitialize().unwrap();
    assert_eq!(loader.load_count(silent), 0);
}

#[test]
fn test_unbalanced_uninitialize_reported() {
    init_logging();

    let runtime = Arc::new(ComRuntime::new());
    runtime.initialize(ThreadingModel::Multithreaded).unwrap();

    // A thread that never initialized cannot release someone else's count
    let err = {
        let runtime = runtime.clone();
        thread::spawn(move || runtime.uninitialize().unwrap_err()).join().unwrap()
    };
    assert!(matches!(err, ComError::NotInitialized));
    assert_eq!(err.hresult(), 0x800401F0);
    assert_eq!(runtime.lock_count(), 1);
    assert!(runtime.is_running());

    runtime.uninitialize().unwrap();
    assert_eq!(runtime.lock_count(), 0);
}
