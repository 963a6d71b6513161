// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trellis media driver binary.
//!
//! Runs until interrupted. Takes at most one positional argument, a
//! properties file overriding the built-in defaults; exits non-zero on a
//! configuration error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use trellis::{DriverConfig, MediaDriver};

/// Reliable UDP publish/subscribe media driver
#[derive(Parser, Debug)]
#[command(name = "trellis-driver")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Properties file (key=value lines) overriding driver defaults
    properties: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.properties {
        Some(path) => DriverConfig::from_properties_file(&path),
        None => Ok(DriverConfig::default()),
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let mut driver = match MediaDriver::launch(config) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("failed to start driver: {}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::Release);
    }) {
        log::warn!("[main] could not install signal handler: {}", e);
    }

    log::info!("[main] driver running in {}", driver.dir().display());
    while running.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    log::info!("[main] shutting down");
    driver.close();
}
