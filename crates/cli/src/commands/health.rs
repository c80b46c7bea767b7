//! `meshbrain health`: tier availability and provider status.

use meshbrain_agent::Orchestrator;
use std::path::Path;

fn mark(ok: bool) -> &'static str {
    if ok { "ok" } else { "UNAVAILABLE" }
}

pub async fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let orchestrator = Orchestrator::from_config(&config).await?;

    let report = orchestrator.check_health().await;
    let stats = orchestrator.memory().stats().await;

    println!("MeshBrain Health: {}", report.status);
    println!("==========================\n");
    println!("  Tiers");
    println!("    HOT:   {}", mark(report.tiers.hot));
    println!(
        "    WARM:  {} ({}, {} turns)",
        mark(report.tiers.warm),
        stats.warm_store,
        stats
            .warm_turns
            .map_or_else(|| "?".to_string(), |n| n.to_string())
    );
    println!(
        "    COLD:  {} ({}, {} turns)",
        mark(report.tiers.cold),
        stats.cold_store,
        stats
            .cold_turns
            .map_or_else(|| "?".to_string(), |n| n.to_string())
    );
    println!("    Queue: {} pending WARM writes", report.tiers.warm_queue_depth);

    println!("\n  Providers (priority order)");
    for (i, check) in report.provider_checks.iter().flatten().enumerate() {
        match &check.error {
            None => println!("    {}. {}: reachable", i + 1, check.provider),
            Some(e) => println!("    {}. {}: UNREACHABLE ({e})", i + 1, check.provider),
        }
    }

    if report.tiers.all_available() {
        println!("\n  All tiers available.");
    } else {
        println!("\n  Degraded: replies still work, persistence is reduced.");
    }

    Ok(())
}
