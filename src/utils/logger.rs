use env_logger::{Builder, Env};

/// Initialize logging. Default level is `info`; override with RUST_LOG.
/// Timestamps are omitted because the journal adds its own.
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();
}
