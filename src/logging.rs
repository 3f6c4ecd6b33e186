//! Log sink setup.
//!
//! Every record carries its source location so a serial capture can be
//! traced back to the code that produced it.
//!
//! Format: [file:line] LEVEL message

use std::io::Write;

use env_logger::{Builder, Env};
use log::SetLoggerError;

/// Install the global logger. `RUST_LOG` overrides the default `info` filter.
pub fn init() -> Result<(), SetLoggerError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}:{}] {} {}",
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.level(),
            record.args()
        )
    });
    builder.try_init()
}
