//! CLI entry point: probe selection, session activation, and the server
//! accept loop.
//!
//! List probes, pick one, optionally reset-and-halt, then hand off to the
//! server, built on `clap`'s derive API and a config-file/env layer.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use avr_debug_server::config::DaemonConfig;
use avr_debug_server::controller;
use avr_debug_server::logging::{self, LevelFilter};
use avr_debug_server::probe::{DebugWireProbe, FakeTransport, UpdiProbe};
use avr_debug_server::server;
use avr_debug_server::target::catalog::TargetCatalog;

#[derive(Debug, Parser)]
#[command(name = "avr-debug-server", about = "GDB remote-serial debug server for 8-bit AVR microcontrollers")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the GDB remote-serial listener on.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Which single-wire interface the attached probe speaks.
    #[arg(long, value_enum, default_value_t = InterfaceArg::Debugwire)]
    interface: InterfaceArg,

    /// Reset and halt the target immediately after activating the session.
    #[arg(long)]
    reset_halt: bool,

    /// Log verbosity; overrides the config file's log_level.
    #[arg(long, value_enum)]
    log_level: Option<LevelFilter>,

    /// Write logs to this file in addition to stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum InterfaceArg {
    Debugwire,
    Updi,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match DaemonConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: configuration: {e}");
            process::exit(1);
        }
    };
    if let Some(bind_addr) = &cli.bind_addr {
        match bind_addr.parse() {
            Ok(addr) => config.bind_addr = addr,
            Err(e) => {
                eprintln!("error: invalid --bind-addr: {e}");
                process::exit(1);
            }
        }
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    let _log_guard = match logging::setup_logging(config.log_file.as_deref(), config.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: failed to set up logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(cli, config) {
        tracing::error!(error = %e, "fatal error");
        process::exit(1);
    }
}

fn run(cli: Cli, config: DaemonConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)?;
    tracing::info!(addr = %config.bind_addr, "listening");

    // A real deployment drives the probe over USB HID; that transport is
    // out of scope here, so the CLI wires up a loopback stand-in that
    // answers every command with "ok". Swapping in a real `Transport`
    // impl does not change anything above the `ProbeSession` boundary.
    let transport = FakeTransport::new();
    let (handle, events) = match cli.interface {
        InterfaceArg::Debugwire => controller::spawn(
            DebugWireProbe::new(transport),
            TargetCatalog::builtin(),
            config.controller_timeout,
        ),
        InterfaceArg::Updi => controller::spawn(
            UpdiProbe::new(transport),
            TargetCatalog::builtin(),
            config.controller_timeout,
        ),
    };

    if cli.reset_halt {
        handle.activate()?;
        handle.reset()?;
        handle.stop()?;
        handle.deactivate()?;
    }

    server::serve(listener, handle, events).map_err(Into::into)
}
