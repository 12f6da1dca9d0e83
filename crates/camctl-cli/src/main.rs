//! `camctl-cli` – operator shell for a camera control session.
//!
//! This binary:
//!
//! 1. Installs tracing (stderr, optional OTLP export).
//! 2. Loads `~/.camctl/config.toml`, writing the defaults on first run.
//! 3. Builds a [`CameraSession`] over the simulated device described by the
//!    `[device]` section.
//! 4. Drops the operator into an **interactive REPL** with slash-commands
//!    (`/connect`, `/start`, `/get`, `/set`, `/help`, …).
//! 5. Intercepts **Ctrl-C** to stop acquisition, close the device and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, warn};

use camctl_hal::SimCamera;
use camctl_runtime::{CameraSession, ReasonFilter};
use camctl_types::ChangeReason;

fn main() {
    let _telemetry = camctl_runtime::init_tracing("camctl");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let (cfg, source) = config::load();
    match source {
        config::ConfigSource::File => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        config::ConfigSource::Missing => match config::save(&config::Config::default()) {
            Ok(()) => println!(
                "  Default config written to {}",
                config::config_path().display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Could not write config".yellow(), e),
        },
        config::ConfigSource::Fallback(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }

    let session_config = match cfg.session_config() {
        Ok(sc) => sc,
        Err(e) => {
            error!(error = %e, "invalid control timing");
            eprintln!("{}: {}", "Invalid configuration".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Session ───────────────────────────────────────────────────────────
    let device = SimCamera::new(cfg.device.model.clone())
        .with_resolution(cfg.device.width, cfg.device.height)
        .with_grab_delay(Duration::from_millis(cfg.device.grab_delay_ms));

    let session = match CameraSession::new(Box::new(device), session_config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "camera session could not be created");
            eprintln!("{}: {}", "Driver error".red().bold(), e);
            std::process::exit(1);
        }
    };

    println!(
        "  Device: {} ({}x{})",
        cfg.device.model.bold(),
        cfg.device.width,
        cfg.device.height
    );

    // Announce everything except the frame stream.
    session.subscribe(
        ReasonFilter::only([
            ChangeReason::Connection,
            ChangeReason::Acquisition,
            ChangeReason::Properties,
        ]),
        |event| println!("  {} {:?}", "·".dimmed(), event.reason),
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    let session_ctrlc = Arc::clone(&session);

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – closing the camera …".yellow().bold()
        );
        shutdown_clone.store(true, Ordering::SeqCst);
        match session_ctrlc.disconnect() {
            Ok(()) => println!("{}", "  ✓ Camera closed.".green()),
            Err(e) => println!("{} {}", "  ✗ Disconnect failed:".red(), e),
        }
        println!("{}", "  ✓ Exiting camctl.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the camera will not be closed on Ctrl-C");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&session, shutdown);

    if let Err(e) = session.disconnect() {
        warn!(error = %e, "disconnect on exit failed");
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ┌──────────────────────────────┐".bold().cyan());
    println!(
        "{}",
        format!("  │  camctl {:<21}│", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    println!("{}", "  │  camera control shell        │".bold().cyan());
    println!("{}", "  └──────────────────────────────┘".bold().cyan());
    println!();
}
