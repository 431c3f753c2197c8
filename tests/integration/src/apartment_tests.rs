//! Apartment Tests - STA and MTA Threading Model Tests
//!
//! These tests exercise apartment lifecycle through the runtime:
//! - STA (Single-Threaded Apartment): per-thread identity and message window
//! - MTA (Multi-Threaded Apartment): one shared identity for the process
//! - Re-initialization rules and threading model changes
//! - Message posting, pumping and thread affinity

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use common::*;
use combase::types::current_thread_ordinal;
use combase::{ComError, ComRuntime, InitStatus, Oxid, ThreadingModel};

#[test]
fn test_sta_identity_and_window() {
    init_logging();

    let runtime = ComRuntime::new();
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();

    let apartment = runtime.current_apartment().unwrap();
    assert_eq!(apartment.oxid(), Oxid::for_sta(current_thread_ordinal()));
    assert_eq!(apartment.oxid().process_id(), std::process::id());
    assert_eq!(apartment.model(), ThreadingModel::ApartmentThreaded);
    assert!(apartment.parent().map_or(false, |parent| parent.is_shared()));

    let window = runtime.lookup_apartment_window(apartment.oxid()).unwrap();
    assert_eq!(window.oxid(), apartment.oxid());
    assert!(runtime.lookup_apartment_window(Oxid::for_mta()).is_none());

    runtime.uninitialize().unwrap();
    assert!(runtime.lookup_apartment_window(apartment.oxid()).is_none());
    assert!(!window.is_connected());
}

#[test]
fn test_mta_threads_share_identity() {
    init_logging();

    const NUM_THREADS: usize = 8;
    let runtime = Arc::new(ComRuntime::new());
    let oxids = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let runtime = runtime.clone();
            let oxids = oxids.clone();
            thread::spawn(move || {
                runtime.initialize(ThreadingModel::Multithreaded).unwrap();
                let apartment = runtime.current_apartment().unwrap();
                assert!(apartment.window().is_none());
                oxids.lock().push(apartment.oxid());
                runtime.uninitialize().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let oxids = oxids.lock();
    println!("\n=== MTA Shared Identity Test ===");
    println!("Threads: {}", oxids.len());
    assert_eq!(oxids.len(), NUM_THREADS);
    assert!(oxids.iter().all(|oxid| *oxid == Oxid::for_mta()));
    assert_eq!(runtime.lock_count(), 0);
}

#[test]
fn test_sta_identities_distinct() {
    init_logging();

    let runtime = Arc::new(ComRuntime::new());
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
    let here = runtime.current_apartment().unwrap().oxid();

    let there = {
        let runtime = runtime.clone();
        thread::spawn(move || {
            runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
            let oxid = runtime.current_apartment().unwrap().oxid();
            runtime.uninitialize().unwrap();
            oxid
        })
        .join()
        .unwrap()
    };

    assert_ne!(here, there);
    assert_eq!(here.process_id(), there.process_id());
    runtime.uninitialize().unwrap();
}

#[test]
fn test_nested_initialize() {
    init_logging();

    let runtime = ComRuntime::new();
    assert_eq!(
        runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap(),
        InitStatus::Initialized
    );
    for _ in 0..3 {
        assert_eq!(
            runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap(),
            InitStatus::AlreadyInitialized
        );
    }
    let apartment = runtime.current_apartment().unwrap();
    assert_eq!(apartment.inits(), 4);

    // Mode change is refused and changes nothing
    let err = runtime.initialize(ThreadingModel::Multithreaded).unwrap_err();
    assert!(matches!(
        err,
        ComError::ChangedMode {
            current: ThreadingModel::ApartmentThreaded,
            requested: ThreadingModel::Multithreaded,
        }
    ));
    assert_eq!(err.hresult(), 0x80010106);
    assert_eq!(apartment.inits(), 4);
    assert_eq!(runtime.lock_count(), 4);

    for remaining in (0..4).rev() {
        runtime.uninitialize().unwrap();
        assert_eq!(runtime.current_apartment().is_some(), remaining > 0);
    }
    assert!(matches!(runtime.uninitialize(), Err(ComError::NotInitialized)));
    assert_eq!(runtime.lock_count(), 0);
}

#[test]
fn test_post_and_pump_on_owner() {
    init_logging();

    let runtime = ComRuntime::new();
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
    let apartment = runtime.current_apartment().unwrap();
    let window = apartment.window().unwrap();

    const NUM_POSTERS: usize = 4;
    let delivered = Arc::new(AtomicUsize::new(0));
    let owner = thread::current().id();
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    let posters: Vec<_> = (0..NUM_POSTERS)
        .map(|_| {
            let window = window.clone();
            let delivered = delivered.clone();
            let ran_on = ran_on.clone();
            thread::spawn(move || {
                window
                    .post(move || {
                        delivered.fetch_add(1, Ordering::SeqCst);
                        ran_on.lock().push(thread::current().id());
                    })
                    .unwrap();
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    // Nothing runs until the owner pumps
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(apartment.pump_messages().unwrap(), NUM_POSTERS);
    assert_eq!(delivered.load(Ordering::SeqCst), NUM_POSTERS);
    assert!(ran_on.lock().iter().all(|id| *id == owner));

    let reply = window.call(|| 6 * 7).unwrap();
    apartment.pump_messages().unwrap();
    assert_eq!(reply.blocking_recv().unwrap(), 42);

    runtime.uninitialize().unwrap();
}

#[test]
fn test_pump_off_owner_thread() {
    init_logging();

    let runtime = ComRuntime::new();
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
    let apartment = runtime.current_apartment().unwrap();

    let err = {
        let apartment = apartment.clone();
        thread::spawn(move || apartment.pump_messages().unwrap_err())
            .join()
            .unwrap()
    };
    assert!(matches!(err, ComError::WrongThread));
    assert_eq!(err.hresult(), 0x8001010E);

    runtime.uninitialize().unwrap();
}

#[test]
fn test_post_after_destroy() {
    init_logging();

    let runtime = ComRuntime::new();
    runtime.initialize(ThreadingModel::ApartmentThreaded).unwrap();
    let window = runtime.current_apartment().unwrap().window().unwrap();
    runtime.uninitialize().unwrap();

    let err = window.post(|| {}).unwrap_err();
    assert!(matches!(err, ComError::Disconnected(_)));
    assert!(window.call(|| 1).is_err());
}

#[test]
fn test_apartment_type_query() {
    init_logging();

    let runtime = Arc::new(ComRuntime::new());
    assert!(matches!(runtime.apartment_type(), Err(ComError::NotInitialized)));

    runtime.initialize(ThreadingModel::Multithreaded).unwrap();
    assert_eq!(runtime.apartment_type().unwrap(), ThreadingModel::Multithreaded);

    // Another thread's state is its own
    let other = {
        let runtime = runtime.clone();
        thread::spawn(move || runtime.apartment_type().is_err()).join().unwrap()
    };
    assert!(other);

    runtime.uninitialize().unwrap();
}
