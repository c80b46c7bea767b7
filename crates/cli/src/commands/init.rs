//! `meshbrain init`: write a default config file.

use meshbrain_config::AppConfig;
use std::path::Path;

pub async fn run(path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(path);

    println!("MeshBrain First-Time Setup");
    println!("============================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("  Created config directory: {}", dir.display());
        } else {
            println!("  Config directory exists: {}", dir.display());
        }
    }

    if config_path.exists() && !force {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or re-run with --force to overwrite.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created config.toml at: {}", config_path.display());
    println!("\n  Next steps:");
    println!("   1. Edit {} and set provider API keys", config_path.display());
    println!("      (or export the variables named by each provider's api_key_env)");
    println!("   2. Run: meshbrain chat");
    println!("   3. Or serve the HTTP API: meshbrain serve\n");

    Ok(())
}
