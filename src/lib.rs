#[macro_use]
mod logging;

pub mod bridge;
pub mod control;
pub mod directory;
pub mod gateway;
pub mod io;
pub mod settings;

use std::sync::mpsc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;

use bridge::Bridge;
use control::ControlWriter;
use io::serial::{NativeEnumerator, NativeOpener};
use settings::CliArgs;

/// Process exit statuses
pub mod exit_status {
    /// Parent closed the control channel
    pub const ORDERLY: i32 = 0;
    /// Malformed control framing from the parent
    pub const CONTROL_FAULT: i32 = 1;
    /// Settings, runtime or listener could not be set up
    pub const STARTUP_FAILURE: i32 = 2;
}

/// Start the bridge and block until the control channel ends.
/// Returns the process exit status.
pub fn run() -> i32 {
    let cli = match CliArgs::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return exit_status::ORDERLY;
        }
        // Launchers may pass flags of their own (e.g. --parent-window on Windows)
        Err(e) => {
            tlog!("[setup] Ignoring unrecognised arguments: {}", e.kind());
            CliArgs::default()
        }
    };
    if !cli.launcher_args.is_empty() {
        tlog!("[setup] Ignoring launcher arguments: {:?}", cli.launcher_args);
    }

    let settings = match settings::resolve_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            tlog!("[setup] {}", e);
            return exit_status::STARTUP_FAILURE;
        }
    };

    if let Some(dir) = &settings.log_dir {
        if let Err(e) = logging::init_file_logging(dir) {
            tlog!("[setup] {}", e);
        }
    }
    tlog!("[setup] webserial-bridge {} starting", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tlog!("[setup] Failed to start runtime: {}", e);
            return exit_status::STARTUP_FAILURE;
        }
    };

    let status = runtime.block_on(async {
        let address = settings.listen_address();
        let listener = match tokio::net::TcpListener::bind(&address).await {
            Ok(l) => l,
            Err(e) => {
                tlog!("[setup] Failed to listen on {}: {}", address, e);
                return exit_status::STARTUP_FAILURE;
            }
        };

        let (events_tx, events_rx) = mpsc::channel();
        tokio::spawn(gateway::server::serve(
            listener,
            events_tx.clone(),
            settings.verbose,
        ));

        if let Err(e) = control::spawn_stdin_reader(events_tx.clone()) {
            tlog!("[setup] Failed to start control reader: {}", e);
            return exit_status::STARTUP_FAILURE;
        }

        let bridge = Bridge::new(
            &settings,
            Box::new(NativeOpener::default()),
            Box::new(NativeEnumerator),
            ControlWriter::stdout(),
            events_tx,
        );
        match tokio::task::spawn_blocking(move || bridge.run(events_rx)).await {
            Ok(status) => status,
            Err(e) => {
                tlog!("[bridge] Foreground task failed: {}", e);
                exit_status::CONTROL_FAULT
            }
        }
    });

    // The stdin reader may still be blocked in read; it dies with the process
    runtime.shutdown_timeout(Duration::from_secs(1));
    logging::stop_file_logging();
    status
}
