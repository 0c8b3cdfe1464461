//! The tidenet server binary.

use std::ops::ControlFlow;
use std::process::ExitCode;

use clap::Parser;
use tidenet_config::{CliArgs, Config};
use tidenet_server::{Server, ServerDirs, ServerError, TickLoop};

/// Seconds between checks of `config.ron` for changes.
const RELOAD_CHECK_SECS: u64 = 5;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tidenet-server: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> Result<(), ServerError> {
    let dirs = match &args.config {
        Some(dir) => ServerDirs::from_config_dir(dir.clone()),
        None => ServerDirs::resolve()?,
    };

    let mut config = Config::load_or_create(&dirs.config_dir)?;
    config.apply_cli_overrides(args);
    config.validate()?;

    let log = tidenet_log::init_logging(Some(&dirs.log_dir), config.debug.log_to_file, Some(&config))?;
    tracing::info!("Using config directory {}", dirs.config_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tidenet-writer")
        .enable_io()
        .build()?;

    let mut server = Server::new(&config, runtime.handle().clone())?;
    let addr = server.start()?;
    tracing::info!(
        "Serving {} channel(s) on {addr} at {} Hz",
        config.network.channels.len(),
        config.server.tick_rate
    );

    let mut tick_loop = TickLoop::new(config.server.tick_rate);
    let mut reload_every = RELOAD_CHECK_SECS * u64::from(config.server.tick_rate);
    tick_loop.run(|tick_loop| {
        server.tick();

        if tick_loop.tick_count() % reload_every == 0 {
            match config.reload_with_overrides(&dirs.config_dir, args) {
                Ok(Some(updated)) => {
                    if let Err(e) = updated.validate() {
                        tracing::warn!("Ignoring config reload: {e}");
                    } else {
                        // Listener settings need a restart.
                        if updated.server.tick_rate != config.server.tick_rate {
                            tracing::info!("Tick rate changed to {} Hz", updated.server.tick_rate);
                            tick_loop.set_tick_rate(updated.server.tick_rate);
                            reload_every = RELOAD_CHECK_SECS * u64::from(updated.server.tick_rate);
                        }
                        if updated.debug.log_level != config.debug.log_level {
                            match log.apply(&updated) {
                                Ok(()) => {
                                    tracing::info!("Log level set to {:?}", updated.debug.log_level)
                                }
                                Err(e) => tracing::warn!("Could not change log level: {e}"),
                            }
                        }
                        config = updated;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Ignoring config reload: {e}"),
            }
        }
        ControlFlow::<()>::Continue(())
    });

    Ok(())
}
