//! `meshbrain export`: dump a user's history as JSON lines.

use chrono::{DateTime, Utc};
use meshbrain_core::memory::TimeRange;
use meshbrain_memory::MemoryManager;
use std::io::Write;
use std::path::{Path, PathBuf};

fn parse_time(name: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("--{name} must be an RFC 3339 timestamp: {e}"))
        })
        .transpose()
}

pub async fn run(
    path: Option<&Path>,
    user: &str,
    since: Option<String>,
    until: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let range = TimeRange::new(parse_time("since", since)?, parse_time("until", until)?);

    // Export needs no providers, only the durable tiers.
    let memory = MemoryManager::from_config(&config.memory).await?;
    let turns = memory.export_history(user, range).await?;

    let mut out: Box<dyn Write> = match &output {
        Some(file) => Box::new(std::io::BufWriter::new(std::fs::File::create(file)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    for turn in &turns {
        serde_json::to_writer(&mut out, turn)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    if let Some(file) = output {
        eprintln!("Exported {} turns for '{user}' to {}", turns.len(), file.display());
    }
    Ok(())
}
