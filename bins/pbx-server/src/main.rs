use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pbx_config::{ServerConfig, toml_config};
use pbx_core::debug;
use pbx_switch::{Pbx, serve};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "PBX telephone exchange simulator",
    long_about = "Accepts client connections, assigns each one a telephone-unit \
                  extension, and coordinates calls between them"
)]
struct Args {
    /// TCP port to listen on (must be >= 1024)
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Optional TOML config with server parameters
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
}

/// Resolve the effective configuration: file first, CLI overrides on top
fn load_config(args: &Args) -> ServerConfig {
    let mut cfg = match &args.config {
        Some(path) => match toml_config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    if let Some(port) = args.port {
        cfg.port = port;
    }
    if cfg.port < 1024 {
        eprintln!("Invalid port {}: must be >= 1024", cfg.port);
        std::process::exit(1);
    }

    cfg
}

fn main() {
    let args = Args::parse();
    let cfg = load_config(&args);
    let _log_guard = debug::setup_logging_default(cfg.debug_log.clone());

    tracing::info!("pbx {} starting", pbx_core::STACK_VERSION);

    // SIGINT/SIGTERM/SIGHUP all trigger the graceful drain; the accept loop
    // checks the flag between accepts. SIGPIPE needs no handler: the Rust
    // runtime masks it, so dead-peer writes surface as BrokenPipe errors.
    let shutting_down = Arc::new(AtomicBool::new(false));
    let flag = shutting_down.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to set termination handler");

    let pbx = Arc::new(Pbx::new(cfg.max_extensions));
    if let Err(e) = serve(&cfg, pbx, shutting_down) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing::info!("exchange terminated cleanly");
}
