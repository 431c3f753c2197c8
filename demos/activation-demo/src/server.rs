//! Simulated local server process
//!
//! "Launching" `calc-server.exe` starts a thread that plays the server
//! process: its own runtime, registering the calculator factory as a local
//! server in the export table it shares with the client.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use combase::activation::LocalExportTable;
use combase::host::ProcessLauncher;
use combase::{ClsCtx, ComError, ComPtr, ComRuntime, RegCls, Result, ThreadingModel};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::calculator::{CalculatorFactory, CLSID_CALCULATOR_LOCAL};

struct RunningServer {
    stop: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// Launcher that runs `calc-server.exe` as a thread
pub struct ThreadLauncher {
    exports: Arc<LocalExportTable>,
    factory: Arc<CalculatorFactory>,
    startup_delay: Duration,
    running: Mutex<Vec<RunningServer>>,
}

impl ThreadLauncher {
    pub fn new(exports: Arc<LocalExportTable>, factory: Arc<CalculatorFactory>, startup_delay: Duration) -> Self {
        Self {
            exports,
            factory,
            startup_delay,
            running: Mutex::new(Vec::new()),
        }
    }

    /// Ask every server to exit and wait for it
    pub fn shutdown(&self) {
        let servers = std::mem::take(&mut *self.running.lock());
        for server in servers {
            let _ = server.stop.send(());
            if server.thread.join().is_err() {
                error!("Local server thread panicked");
            }
        }
    }
}

impl ProcessLauncher for ThreadLauncher {
    fn spawn(&self, command_line: &str) -> Result<()> {
        if !command_line.starts_with("calc-server.exe") {
            return Err(ComError::AppNotFound(command_line.to_string()));
        }

        let (stop, stopped) = oneshot::channel();
        let exports = self.exports.clone();
        let factory: ComPtr = self.factory.clone();
        let delay = self.startup_delay;

        let thread = thread::Builder::new()
            .name("calc-server".to_string())
            .spawn(move || {
                if let Err(e) = serve(exports, factory, delay, stopped) {
                    error!("Local server failed: {}", e);
                }
            })
            .map_err(|e| ComError::AppNotFound(format!("{}: {}", command_line, e)))?;

        self.running.lock().push(RunningServer { stop, thread });
        Ok(())
    }
}

fn serve(
    exports: Arc<LocalExportTable>,
    factory: ComPtr,
    startup_delay: Duration,
    stopped: oneshot::Receiver<()>,
) -> Result<()> {
    let runtime = ComRuntime::builder().exporter(exports).build();
    runtime.initialize(ThreadingModel::Multithreaded)?;

    info!("[server] starting up");
    thread::sleep(startup_delay);

    let token = runtime.register_class_object(
        &CLSID_CALCULATOR_LOCAL,
        &factory,
        ClsCtx::LOCAL_SERVER,
        RegCls::MULTIPLEUSE,
    )?;
    info!("[server] registered {} as {}", CLSID_CALCULATOR_LOCAL, token);

    let _ = stopped.blocking_recv();

    runtime.revoke_class_object(token)?;
    runtime.uninitialize()?;
    info!("[server] exited");
    Ok(())
}
