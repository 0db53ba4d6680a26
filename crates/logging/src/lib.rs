//! Helpers for logging.
//!
//! The library crates only ever use the `log` macros; binaries and tests pick where the output goes by calling one of
//! these once at startup.
use std::sync::Once;

use time::format_description::well_known::Rfc3339;

/// The filter used when `RUST_LOG` isn't set.
pub const DEFAULT_FILTER: &str = "info";

/// Log to stderr, filtered by `RUST_LOG` or else [DEFAULT_FILTER].
///
/// If called multiple times in the same process, only applies once.
pub fn log_to_stderr() {
    log_to_stderr_with_default(DEFAULT_FILTER);
}

/// Like [log_to_stderr], with a different filter for when `RUST_LOG` isn't set.
pub fn log_to_stderr_with_default(default_filter: &str) {
    static ONCE: Once = Once::new();

    ONCE.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(default_filter);
        let res = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                use std::io::Write;

                let now = time::OffsetDateTime::now_utc();
                let now = now.format(&Rfc3339).unwrap_or_else(|_| now.to_string());

                writeln!(
                    buf,
                    "{} {} time={} target={}",
                    record.level(),
                    record.args(),
                    now,
                    record.target()
                )
            })
            .try_init();

        // Someone else got there first, which is fine as long as output goes somewhere.
        if let Err(e) = res {
            log::debug!("Not installing the stderr logger: {}", e);
        }
    });
}
