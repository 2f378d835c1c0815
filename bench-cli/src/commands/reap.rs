//! Manual cleanup of leftover workloads.

use anyhow::Result;

use pairbench_core::{Config, Reaper, Role, Workloads};

/// Reap both roles' workloads on their targets, reporting each result.
pub async fn run(config: &Config) -> Result<()> {
    let workloads = Workloads::from_config(config);
    let reaper = Reaper::new(super::executor(config));

    let mut failures = 0;
    for role in [Role::Server, Role::Client] {
        let spec = workloads.spec(role);
        match reaper.try_reap(&spec.target, &spec.identifier).await {
            Ok(()) => println!("{:<6} {}: reaped '{}'", role, spec.target, spec.identifier),
            Err(e) => {
                failures += 1;
                println!("{:<6} {}: FAILED ({})", role, spec.target, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of 2 targets could not be reaped", failures);
    }
    Ok(())
}
