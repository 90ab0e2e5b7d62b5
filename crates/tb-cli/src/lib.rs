pub mod server_cli;

/// Install the process-wide subscriber; `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    ssh_core::logging::init(default_level);
}
