//! Structured logging for the tidenet server.
//!
//! Console output with uptime timestamps and module paths, plus an optional
//! JSON file for post-mortem analysis. The level comes from `RUST_LOG` when
//! set, otherwise from the config's `debug.log_level`, and in that case can
//! be changed at runtime through the returned [`LogHandle`].

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tidenet_config::Config;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Filter used when neither `RUST_LOG` nor the config says otherwise.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file inside the log directory.
pub const LOG_FILE: &str = "tidenet.log";

/// Live handle on the level filter installed by [`init_logging`].
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Switch to the level in `config`. Does nothing while `RUST_LOG`
    /// controls the filter.
    pub fn apply(&self, config: &Config) -> Result<(), reload::Error> {
        if self.from_env {
            return Ok(());
        }
        self.set_filter(&filter_directive(Some(config)))
    }

    /// Replace the filter with `directive`.
    pub fn set_filter(&self, directive: &str) -> Result<(), reload::Error> {
        self.filter.reload(EnvFilter::new(directive))
    }
}

fn reloadable(filter: EnvFilter, from_env: bool) -> (reload::Layer<EnvFilter, Registry>, LogHandle) {
    let (layer, filter) = reload::Layer::new(filter);
    (layer, LogHandle { filter, from_env })
}

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - Directory for the JSON log file
/// * `file_logging` - Whether to write the JSON log file at all
/// * `config` - Optional configuration to take the log level from
///
/// Records emitted through the `log` facade are forwarded as well.
///
/// ```no_run
/// use tidenet_config::Config;
/// use tidenet_log::init_logging;
///
/// let config = Config::default();
/// let log = init_logging(Some(std::path::Path::new("./logs")), true, Some(&config)).unwrap();
/// log.set_filter("debug").unwrap();
/// ```
pub fn init_logging(
    log_dir: Option<&Path>,
    file_logging: bool,
    config: Option<&Config>,
) -> Result<LogHandle, TryInitError> {
    let (env_filter, handle) = match EnvFilter::try_from_default_env() {
        Ok(filter) => reloadable(filter, true),
        Err(_) => reloadable(EnvFilter::new(filter_directive(config)), false),
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if file_logging
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = File::create(log_dir.join(LOG_FILE))
    {
        subscriber.with(json_file_layer(log_file)).try_init()?;
        return Ok(handle);
    }

    subscriber.try_init()?;
    Ok(handle)
}

/// Filter directive for `config`, falling back to [`DEFAULT_FILTER`].
pub fn filter_directive(config: Option<&Config>) -> String {
    config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Layer writing one JSON object per event to `file`.
pub fn json_file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json()
}
