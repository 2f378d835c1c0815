//! Run a campaign.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use pairbench_core::{CampaignResult, CampaignScheduler, Config, ResultRecorder};

/// Run the campaign. Returns whether every parameter set passed.
pub async fn run(
    config: Config,
    results: Option<PathBuf>,
    workers: Option<usize>,
    json: bool,
) -> Result<bool> {
    if workers == Some(0) {
        anyhow::bail!("--workers must be at least 1");
    }

    let dir = results.unwrap_or_else(|| config.results.directory.clone());
    let recorder = ResultRecorder::open(&dir)
        .await
        .with_context(|| format!("Failed to open results directory {}", dir.display()))?;

    let mut scheduler =
        CampaignScheduler::new(&config, super::executor(&config), Arc::new(recorder));
    if let Some(workers) = workers {
        scheduler = scheduler.with_workers(workers);
    }
    let campaign = scheduler.campaign_id().clone();
    tracing::info!(campaign = %campaign, results = %dir.display(), "starting campaign");

    let result = scheduler.run().await.context("Campaign failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_table(&result);
        println!();
        println!("Results: {}", dir.display());
    }
    Ok(result.all_passed())
}

fn print_table(result: &CampaignResult) {
    println!("=== campaign {} ===", result.campaign_id);
    println!();
    let width = result
        .outcomes
        .iter()
        .map(|o| o.name.len())
        .max()
        .unwrap_or(0)
        .max("PARAMETER SET".len());
    println!("{:<width$}  {:<6}  {:>9}  {:>8}", "PARAMETER SET", "RESULT", "SUCCESSES", "ATTEMPTS");
    for outcome in &result.outcomes {
        println!(
            "{:<width$}  {:<6}  {:>9}  {:>8}",
            outcome.name,
            if outcome.passed { "PASS" } else { "FAIL" },
            outcome.state.success_count,
            outcome.state.attempt_count,
        );
    }

    let failed = result.failed();
    println!();
    if failed.is_empty() {
        println!("All {} parameter sets passed.", result.outcomes.len());
    } else {
        println!(
            "{} of {} parameter sets failed: {}",
            failed.len(),
            result.outcomes.len(),
            failed.join(", ")
        );
    }
}
