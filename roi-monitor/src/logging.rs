use time::{UtcOffset, format_description::well_known::Iso8601};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, time::OffsetTime},
    layer::SubscriberExt,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot determine local UTC offset: {0}")]
    Offset(#[from] time::error::ComponentRange),
    #[error("cannot open log file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Keeps logging alive for as long as it is held.
pub struct LoggingGuard {}

impl Drop for LoggingGuard {
    fn drop(&mut self) {}
}

/// Start logging to the console and, if `path` is given, to a file.
///
/// The filter is taken from `RUST_LOG`, defaulting to `info`.
pub fn initiate_logging<P: AsRef<std::path::Path>>(
    path: Option<P>,
) -> Result<LoggingGuard, Error> {
    // Fixed offset from the timezone at startup.
    let timer = OffsetTime::new(
        UtcOffset::from_whole_seconds(chrono::Local::now().offset().local_minus_utc())?,
        Iso8601::DEFAULT,
    );

    let file_layer = match &path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_timer(timer.clone())
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_thread_names(true),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer()
        .with_timer(timer)
        .with_ansi(!cfg!(windows))
        .with_thread_names(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let collector = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(filter);
    tracing::subscriber::set_global_default(collector)?;

    if let Some(path) = &path {
        tracing::debug!("logging to file \"{}\"", path.as_ref().display());
    }

    Ok(LoggingGuard {})
}
