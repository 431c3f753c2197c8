//! Activation Broker Demo
//!
//! Walks one client thread through every way a component can be reached:
//!
//! 1. A class object registered explicitly in this process
//! 2. An in-process server library found through the registry store
//! 3. A local server, launched on demand and polled until it registers
//!
//! and then through external locks, the running object table, library
//! reaping, and final teardown.
//!
//! Usage:
//!   cargo run -p activation-demo -- --verbose
//!   cargo run -p activation-demo -- --poll-interval-ms 50 --server-delay-ms 400

mod calculator;
mod server;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use combase::activation::LocalExportTable;
use combase::host::{
    register_inproc_server, register_local_server, CancellableWait, MemoryRegistry,
    StaticLibraryLoader,
};
use combase::types::iid;
use combase::{BrokerConfig, ClsCtx, ComPtr, ComRuntime, MultiQi, RegCls, ThreadingModel};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use calculator::*;
use server::ThreadLauncher;

#[derive(Parser, Debug)]
#[command(name = "activation-demo")]
#[command(version)]
#[command(about = "Component activation broker walkthrough")]
struct Args {
    /// Wait between checks for a launched local server, in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Checks before a launched local server is given up on
    #[arg(long, default_value_t = combase::DEFAULT_SERVER_POLL_ATTEMPTS)]
    poll_attempts: u32,

    /// How long the simulated local server takes to register, in milliseconds
    #[arg(long, default_value_t = 1500)]
    server_delay_ms: u64,

    /// Log broker internals
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = BrokerConfig::builder()
        .server_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .server_poll_attempts(args.poll_attempts)
        .build();
    info!(
        "Local servers get {:?} to register ({} polls of {:?})",
        config.server_start_timeout(),
        config.server_poll_attempts,
        config.server_poll_interval
    );

    // Host environment: registry, one library, one local server
    let store = Arc::new(MemoryRegistry::new());
    register_inproc_server(store.as_ref(), &CLSID_CALCULATOR_INPROC, CALC_DLL)?;
    register_local_server(store.as_ref(), &CLSID_CALCULATOR_LOCAL, CALC_SERVER)?;

    let library_factory = CalculatorFactory::new("calc.dll");
    let loader = Arc::new(StaticLibraryLoader::new());
    let library = loader.add_server_module(
        CALC_DLL,
        library_factory.entry_point(),
        Some(library_factory.unload_query()),
    );

    let exports = Arc::new(LocalExportTable::new());
    let server_factory = CalculatorFactory::new("calc-server.exe");
    let launcher = Arc::new(ThreadLauncher::new(
        exports.clone(),
        server_factory.clone(),
        Duration::from_millis(args.server_delay_ms),
    ));

    let runtime = ComRuntime::builder()
        .config(config)
        .store(store)
        .loader(loader.clone())
        .exporter(exports)
        .launcher(launcher.clone())
        .waiter(Arc::new(CancellableWait::new()))
        .build();

    let status = runtime.initialize(ThreadingModel::ApartmentThreaded)?;
    info!("Initialized: {:?} (0x{:08x})", status, status.hresult());

    // 1. Explicit registration
    let local_factory = CalculatorFactory::new("registered");
    let factory_ptr: ComPtr = local_factory.clone();
    let token = runtime.register_class_object(
        &CLSID_CALCULATOR,
        &factory_ptr,
        ClsCtx::INPROC_SERVER,
        RegCls::MULTIPLEUSE,
    )?;
    let calc = runtime.create_instance(&CLSID_CALCULATOR, None, ClsCtx::ALL, &IID_CALCULATOR)?;
    info!("Registered class: 2 + 3 = {}", as_calculator(&calc)?.add(2, 3));

    // 2. In-process server
    let calc = runtime.create_instance(&CLSID_CALCULATOR_INPROC, None, ClsCtx::INPROC_SERVER, &IID_CALCULATOR)?;
    info!(
        "In-process server {}: 6 * 7 = {} (library loads: {})",
        library_factory.name(),
        as_calculator(&calc)?.multiply(6, 7),
        loader.load_count(library)
    );

    let mut results = [MultiQi::new(IID_CALCULATOR), MultiQi::new(iid::IUNKNOWN), MultiQi::new(IID_DISPLAY)];
    let status = runtime.create_instance_ex(&CLSID_CALCULATOR_INPROC, None, ClsCtx::INPROC_SERVER, &mut results)?;
    for result in &results {
        match &result.result {
            Some(Ok(_)) => info!("  {} available", result.iid),
            Some(Err(e)) => info!("  {} refused: {}", result.iid, e),
            None => {}
        }
    }
    info!("CreateInstanceEx: {:?} (0x{:08x})", status, status.hresult());

    // Library stays cached while calculators are alive
    info!("Reaped while in use: {}", runtime.free_unused_libraries());
    drop(calc);
    drop(results);
    info!("Reaped once idle: {}", runtime.free_unused_libraries());

    // 3. Local server
    info!("Activating {} through {:?}", CLSID_CALCULATOR_LOCAL, CALC_SERVER);
    let start = Instant::now();
    match runtime.create_instance(&CLSID_CALCULATOR_LOCAL, None, ClsCtx::LOCAL_SERVER, &IID_CALCULATOR) {
        Ok(calc) => info!(
            "Local server after {:?}: 40 + 2 = {} (created by {})",
            start.elapsed(),
            as_calculator(&calc)?.add(40, 2),
            server_factory.name()
        ),
        Err(e) => warn!("Local server activation failed after {:?}: {} (0x{:08x})", start.elapsed(), e, e.hresult()),
    }

    // External locks and the running object table
    runtime.lock_object_external(&factory_ptr, true, false)?;
    runtime.lock_object_external(&factory_ptr, true, false)?;
    info!("External pins on the registered factory: {}", runtime.external_locks().pins(&factory_ptr));

    let rot = runtime.running_object_table()?;
    rot.register("calculator:registered", &factory_ptr)?;
    info!("Running: {}", rot.is_running("calculator:registered"));

    runtime.revoke_class_object(token)?;
    info!("Revoked {}; {} classes registered", token, runtime.registry().len());

    // Teardown drains whatever is left
    runtime.uninitialize()?;
    info!(
        "After teardown: {} pins, {} cached libraries, factory references {}",
        runtime.external_locks().len(),
        runtime.libraries().len(),
        local_factory.refs()
    );

    launcher.shutdown();
    info!("Done");
    Ok(())
}
