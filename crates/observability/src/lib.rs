//! Process-wide tracing setup shared by the server and worker binaries.

pub mod logging;

pub use logging::LogFormat;

/// Initialize logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
