//! CLI command implementations.

pub mod reap;
pub mod run;
pub mod validate;

use std::sync::Arc;

use pairbench_core::{Config, RemoteExecutor, SshExecutor};

/// Executor for the configured transport.
pub fn executor(config: &Config) -> Arc<dyn RemoteExecutor> {
    Arc::new(SshExecutor::from_config(&config.transport))
}
