use std::{fs::File, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{error, info};

use totemd::{
    application::Application,
    cli::Cli,
    config::{Config, ConfigManager},
    logging,
    pidfile::{self, DaemonStatus},
};

const DAEMON_LOG: &str = "/var/tmp/totemd.log";

fn into_daemon() -> Result<()> {
    File::create(DAEMON_LOG)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn report_status(config: &Config) -> ExitCode {
    match pidfile::status(&config.pid_file) {
        DaemonStatus::Running(pid) => {
            println!("Totem daemon is running (PID {pid}).");
            ExitCode::SUCCESS
        }
        DaemonStatus::Stale(pid) => {
            println!("Totem daemon is not running (stale PID file for {pid}).");
            for path in [&config.pid_file, &config.socket_path] {
                if let Err(e) = pidfile::remove(path) {
                    eprintln!("{e:#}");
                }
            }
            ExitCode::FAILURE
        }
        DaemonStatus::NotRunning => {
            println!("Totem daemon is not running.");
            ExitCode::FAILURE
        }
    }
}

fn stop_daemon(config: &Config) -> Result<()> {
    match pidfile::signal_stop(&config.pid_file)? {
        Some(pid) => println!("Sent stop signal to daemon (PID {pid})."),
        None => println!("Totem daemon is not running."),
    }
    Ok(())
}

fn serve(config_manager: ConfigManager) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(async {
        Application::builder()
            .with_config_manager(config_manager)
            .build()?
            .run()
            .await
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_manager = match ConfigManager::load(cli.config.clone()) {
        Ok(config_manager) => config_manager,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    let config = config_manager.get();

    if cli.status {
        return report_status(config);
    }
    if cli.stop {
        return match stop_daemon(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Could not stop daemon: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    // Checked here as well so a second instance fails before detaching.
    if let DaemonStatus::Running(pid) = pidfile::status(&config.pid_file) {
        eprintln!("Totem daemon is already running (PID {pid}).");
        return ExitCode::FAILURE;
    }

    let started = config
        .log_filter()
        .and_then(|filter| {
            if cli.daemonize {
                into_daemon()?;
            }
            logging::init(cli.daemonize, filter)
        });
    if let Err(e) = started {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match config_manager.path() {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Running with built-in configuration"),
    }

    match serve(config_manager) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
