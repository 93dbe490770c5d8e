//! RoverD - gateway daemon between a serial controller board and TCP clients

use clap::Parser;
use roverd::config::Cli;
use roverd::core::types::SystemState;
use roverd::shared::SharedState;
use roverd::sync::StopFlag;
use roverd::workers::{ControllerWorker, LogWorker, TcpWorker, UsbWorker};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> ExitCode {
    // clap exits with code 2 on argument errors
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = cli.into_config();
    log::info!("roverd v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Board {}@{}, state port {}, cmd port {}",
        cfg.serial_dev,
        cfg.serial_baud,
        cfg.state_port,
        cfg.cmd_port
    );

    let control_mode = cfg.control_mode;
    let sh = SharedState::new(cfg);
    let stop = Arc::new(StopFlag::new());

    // Armed by default; flag routing can disarm/rearm at runtime
    sh.system_state.store(SystemState {
        running: true,
        control_mode,
        continuous_flags: 0,
    });

    // Termination signals flip the stop flag; workers notice within a cycle
    {
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                let mut signals =
                    Signals::new([SIGINT, SIGTERM]).expect("Failed to register signal handlers");
                if let Some(sig) = signals.forever().next() {
                    log::info!("Received signal {}, shutting down", sig);
                    stop.request_stop();
                }
            })
            .expect("Failed to spawn signal handler thread");
    }

    let mut handles = Vec::new();
    {
        let worker = UsbWorker::new(Arc::clone(&sh), Arc::clone(&stop));
        handles.push(
            thread::Builder::new()
                .name("usb-worker".to_string())
                .spawn(move || worker.run())
                .expect("Failed to spawn USB worker"),
        );
    }
    {
        let worker = TcpWorker::new(Arc::clone(&sh), Arc::clone(&stop));
        handles.push(
            thread::Builder::new()
                .name("tcp-worker".to_string())
                .spawn(move || worker.run())
                .expect("Failed to spawn TCP worker"),
        );
    }
    {
        let worker = ControllerWorker::new(Arc::clone(&sh), Arc::clone(&stop));
        handles.push(
            thread::Builder::new()
                .name("ctrl-worker".to_string())
                .spawn(move || worker.run())
                .expect("Failed to spawn controller worker"),
        );
    }
    {
        let worker = LogWorker::new(Arc::clone(&sh), Arc::clone(&stop));
        handles.push(
            thread::Builder::new()
                .name("log-worker".to_string())
                .spawn(move || worker.run())
                .expect("Failed to spawn log worker"),
        );
    }

    // Wait for a stop request (signal, or a worker hitting a fatal error)
    while !stop.stop_requested() {
        thread::sleep(Duration::from_millis(50));
    }
    stop.request_stop();

    for handle in handles {
        let _ = handle.join();
    }

    log::info!("Shutdown complete");

    if sh.is_fatal() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
