// Must come first: `tlog!` is textually scoped to the modules declared after it.
#[macro_use]
mod logging;

pub mod error;
pub mod io;
pub mod lims;
pub mod protocol;
pub mod settings;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::BridgeError;
use crate::io::serial::{available_port_names, SerialByteSource};
use crate::io::{BridgeReader, ByteSource, ReaderOptions, StopReason};
use crate::lims::HttpLimsSink;
use crate::settings::BridgeSettings;

pub use logging::{init_file_logging, stop_file_logging};

/// Forward AIA-360 analyzer results from a serial port to a LIMS.
#[derive(Parser, Debug)]
#[command(name = "aia360-bridge", version, about)]
struct Cli {
    /// Path to the JSON settings file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let settings = match settings::load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tlog!("[main] {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &settings.log_dir {
        if let Err(e) = init_file_logging(dir) {
            tlog!("[main] Continuing without a log file: {}", e);
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tlog!("[main] Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(serve(settings));
    stop_file_logging();
    code
}

/// Build the LIMS sink and open the analyzer port. Any error here ends the
/// process before the reader starts.
fn start_bridge(
    settings: &BridgeSettings,
    runtime: tokio::runtime::Handle,
) -> Result<(SerialByteSource, HttpLimsSink), BridgeError> {
    let sink = HttpLimsSink::new(&settings.lims, runtime)?;

    let mut source = SerialByteSource::new(settings.analyzer.serial_profile());
    source.open()?;

    Ok((source, sink))
}

async fn serve(settings: BridgeSettings) -> ExitCode {
    let dialect = settings.analyzer.dialect;

    let (source, sink) = match start_bridge(&settings, tokio::runtime::Handle::current()) {
        Ok(started) => started,
        Err(e) => {
            tlog!("[main] {}", e);
            if let BridgeError::PortOpen { .. } = e {
                let ports = available_port_names();
                if ports.is_empty() {
                    tlog!("[main] No serial ports found");
                } else {
                    tlog!("[main] Available ports: {}", ports.join(", "));
                }
            }
            return ExitCode::FAILURE;
        }
    };

    tlog!(
        "[main] Bridging {} analyzer on {} to {}",
        dialect,
        source.profile(),
        sink.url()
    );

    let stop_flag = Arc::new(AtomicBool::new(false));
    let worker_flag = stop_flag.clone();
    let mut worker = tokio::task::spawn_blocking(move || {
        let mut reader = BridgeReader::new(source, dialect, sink, ReaderOptions::default());
        reader.run(&worker_flag)
    });

    let finished = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            tlog!("[main] Ctrl-C received, stopping");
            stop_flag.store(true, Ordering::Relaxed);
            worker.await
        }
    };

    match joined {
        Ok(summary) if summary.reason == StopReason::Stopped => ExitCode::SUCCESS,
        Ok(_) => {
            tlog!("[main] Serial port closed unexpectedly");
            ExitCode::FAILURE
        }
        Err(e) => {
            tlog!("[main] Reader task panicked: {:?}", e);
            ExitCode::FAILURE
        }
    }
}
