// SPDX-License-Identifier: GPL-3.0-or-later

//! Logging setup: a `tracing_subscriber` registry with an `EnvFilter`
//! gated by [`crate::error::DebugFlags`], writing to a daily-rotating
//! file via `tracing-appender` alongside stderr.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::DebugFlags;

fn directive_for(debug: DebugFlags) -> &'static str {
    if debug.has(DebugFlags::ALL) {
        "ve=trace"
    } else if debug.0 != 0 {
        "ve=debug"
    } else {
        "ve=info"
    }
}

/// Installs the global subscriber: stderr plus a rolling daily file
/// under `log_dir`. The returned guard must be held for the life of
/// the process — dropping it stops the non-blocking file writer.
pub fn init(log_dir: impl AsRef<Path>, debug: DebugFlags) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir.as_ref())?;
    let file_appender = tracing_appender::rolling::daily(log_dir.as_ref(), "ve.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive_for(debug)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scales_with_debug_flags() {
        assert_eq!(directive_for(DebugFlags(0)), "ve=info");
        assert_eq!(directive_for(DebugFlags(DebugFlags::MP)), "ve=debug");
        assert_eq!(directive_for(DebugFlags(DebugFlags::ALL)), "ve=trace");
    }
}
