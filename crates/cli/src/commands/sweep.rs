//! `meshbrain sweep`: one migration / expiry pass over the tiers.

use meshbrain_memory::MemoryManager;
use std::path::Path;

pub async fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let memory = MemoryManager::from_config(&config.memory).await?;

    let report = memory.sweep_expired().await;

    println!("Sweep complete");
    println!("  HOT expired:     {}", report.hot_expired);
    println!("  WARM → COLD:     {}", report.migrated);
    println!("  COLD deleted:    {}", report.cold_deleted);
    if report.failures > 0 {
        println!("  Failures:        {} (retried on the next sweep)", report.failures);
    }

    Ok(())
}
