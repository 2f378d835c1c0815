//! Validate a campaign file without touching remote hosts.

use pairbench_core::{Config, Role, Workloads};

/// Print the matrix and the commands attempt 1 of each set would run.
pub fn run(config: &Config) {
    let workloads = Workloads::from_config(config);
    let c = &config.campaign;

    println!("=== pairbench validate ===");
    println!();
    println!("Campaign:");
    println!("  Quota:     {} of {} attempts", c.success_quota, c.max_attempts);
    println!("  Timeout:   {}s per attempt", c.attempt_timeout_secs);
    println!("  Settle:    {}ms", c.settle_delay_ms);
    println!("  Workers:   {}", c.workers);
    println!("  Results:   {}", config.results.directory.display());
    println!();
    println!("Targets:");
    for role in [Role::Server, Role::Client] {
        let spec = workloads.spec(role);
        println!(
            "  {:<6} {} (reap: {})",
            role,
            spec.target.ssh_destination(),
            spec.identifier
        );
    }

    for set in &config.parameters {
        println!();
        println!("[{}] bandwidth={} delay={}", set.name, set.bandwidth, set.delay);
        for role in [Role::Server, Role::Client] {
            println!("  {:<6} {}", role, workloads.command(role, set, 1));
        }
    }

    println!();
    println!("OK: {} parameter sets", config.parameters.len());
}
