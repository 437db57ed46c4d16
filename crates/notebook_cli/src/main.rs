//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open the active notebook the same way the application does.
//! - Print a deterministic summary for quick local sanity checks.
//!
//! Usage: `notebook_cli [config.toml]`

use notebook_core::{core_version, init_logging, CoreConfig, NotebookApp};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => CoreConfig::load(&path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };

    std::fs::create_dir_all(&config.data_dir).map_err(|err| err.to_string())?;
    config.data_dir = std::fs::canonicalize(&config.data_dir).map_err(|err| err.to_string())?;
    init_logging(&config.log_level, config.data_dir.join("logs")).map_err(|err| err.to_string())?;

    let app = NotebookApp::start(config).map_err(|err| err.to_string())?;
    println!("notebook_core version={}", core_version());
    println!("degraded={}", app.is_degraded());

    if app.is_registry_unreadable() {
        println!("registry=unreadable");
    } else {
        for entry in app.notebooks().map_err(|err| err.to_string())? {
            let marker = if entry.is_current { "*" } else { " " };
            println!("{marker} {}", entry.name);
        }
    }

    let session = app.session();
    println!(
        "notebook={} backend={}",
        session.notebook(),
        session.backend_kind().as_str()
    );
    for section in session.sections().sections() {
        println!("  [{}] pages={}", section.name, section.pages.len());
    }
    log::info!("event=cli_summary module=cli status=ok");
    Ok(())
}
