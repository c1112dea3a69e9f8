use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use log::{error, info};

use creatflow::{load_config, telemetry, CreatflowApp, CreatflowError};

fn main() -> ExitCode {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: creatflow-worker <config.json>");
        return ExitCode::from(2);
    };

    match run(Path::new(&path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &Path) -> creatflow::Result<()> {
    let config = load_config(config_path)?;
    telemetry::init(&config.log);

    let app = CreatflowApp::build(config)?;
    app.control().schedule_maintenance()?;

    let pool = app.start_workers()?;
    let shutdown = pool.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Shutdown requested, finishing current tasks");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CreatflowError::Worker(format!("Failed to install signal handler: {}", e)))?;

    info!(
        "creatflow-worker running {} workers; press Ctrl-C to stop",
        pool.worker_ids().len()
    );
    pool.wait();
    Ok(())
}
