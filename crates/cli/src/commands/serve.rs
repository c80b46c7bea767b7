//! `meshbrain serve`: start the HTTP API server.

use std::path::Path;

pub async fn run(
    path: Option<&Path>,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(path)?;

    if let Some(host) = host_override {
        config.gateway.host = host;
    }
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("MeshBrain Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Providers: {}",
        config
            .providers
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );
    match config.memory.sweep_interval_secs {
        0 => println!("   Sweeper:   disabled"),
        secs => println!("   Sweeper:   every {secs}s"),
    }

    meshbrain_gateway::start(config).await?;

    Ok(())
}
