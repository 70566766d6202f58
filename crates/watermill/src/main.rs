use std::path::PathBuf;
use std::process::ExitCode;

use log::info;

use watermill::{init_logging, load_config, Config, ConfigError, Service};

/// `~/.watermill/config.json`, read when no path is given on the command line.
fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".watermill").join("config.json"))
}

fn resolve_config() -> Result<Config, ConfigError> {
    if let Some(path) = std::env::args_os().nth(1) {
        return load_config(PathBuf::from(path));
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config(path),
        _ => Ok(Config::default()),
    }
}

fn run() -> watermill::Result<()> {
    let config = resolve_config()?;
    init_logging(config.log_format)?;

    info!("Starting watermill v{}", env!("CARGO_PKG_VERSION"));

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let service = Service::start(&config)?;

    let _ = stop_rx.recv();
    info!("Received shutdown signal");
    service.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("watermill: {}", e);
            ExitCode::FAILURE
        }
    }
}
