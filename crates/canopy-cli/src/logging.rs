use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::LogFormat;

/// Logs go to stderr; stdout carries command output only.
pub fn init_logging(level: &str, format: &LogFormat) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let base = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => tracing_subscriber::registry().with(env).with(base.json()).try_init()?,
        _ => tracing_subscriber::registry().with(env).with(base.compact()).try_init()?,
    }
    Ok(())
}
