//! The tidenet game server: configuration, logging and the transport wired
//! into a fixed-rate loop.

pub mod paths;
pub mod protocol;
pub mod tick_loop;

use std::net::SocketAddr;

use tidenet_config::{Config, ConfigError, NetworkConfig};
use tidenet_net::{
    ConnectionLimits, EngineConfig, NetError, NetworkEngine, RegistryError, SocketConfig,
    TickSummary,
};
use tokio::runtime::Handle;

pub use paths::ServerDirs;
pub use protocol::Protocol;
pub use tick_loop::TickLoop;

/// Seconds between status log lines.
const STATUS_INTERVAL_SECS: u64 = 60;

/// Errors that stop the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The OS did not provide a configuration directory.
    #[error("could not determine OS configuration directory")]
    NoConfigDir,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A global logger was already installed.
    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map network settings onto the engine's configuration.
pub fn engine_config(network: &NetworkConfig) -> Result<EngineConfig, ConfigError> {
    Ok(EngineConfig {
        port: network.port,
        bind_ip: network.bind_ip()?,
        dual_stack: network.dual_stack,
        backlog: network.backlog,
        limits: ConnectionLimits {
            header_byte_limit: network.header_byte_limit,
            max_pending_packet: network.max_pending_packet,
            coalesce_buffer_size: network.coalesce_buffer_size,
        },
        socket: SocketConfig::default(),
    })
}

/// The engine plus the built-in protocol.
pub struct Server {
    engine: NetworkEngine,
    protocol: Protocol,
    status_every: u64,
    ticks: u64,
}

impl Server {
    /// Build the engine from `config` and register channels and packets.
    /// Sends run on `runtime`.
    pub fn new(config: &Config, runtime: Handle) -> Result<Self, ServerError> {
        let mut engine = NetworkEngine::new(engine_config(&config.network)?, runtime);
        for &channel in &config.network.channels {
            engine.register_channel(channel)?;
        }
        let protocol = Protocol::register(&mut engine)?;

        Ok(Self {
            engine,
            protocol,
            status_every: STATUS_INTERVAL_SECS * u64::from(config.server.tick_rate.max(1)),
            ticks: 0,
        })
    }

    /// Open the listening socket.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        Ok(self.engine.start()?)
    }

    /// Run one network tick.
    pub fn tick(&mut self) -> TickSummary {
        let summary = self.engine.tick();
        self.ticks += 1;
        if self.ticks % self.status_every == 0 {
            tracing::info!(
                "{} connections, {} bytes in flight",
                summary.live,
                self.engine.total_in_flight()
            );
        }
        summary
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn engine(&self) -> &NetworkEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut NetworkEngine {
        &mut self.engine
    }
}
