//! `meshbrain chat`: interactive or single-message chat mode.

use meshbrain_agent::{InboundMessage, Orchestrator, Reply};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

const CHANNEL: &str = "cli";

pub async fn run(
    path: Option<&Path>,
    user: String,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;

    let orchestrator = match Orchestrator::from_config(&config).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Every provider needs an API key. Either set it in");
            eprintln!("    {}", super::config_path(path).display());
            eprintln!("  or export the variable named by the provider's api_key_env.");
            eprintln!();
            return Err("No usable provider. See above for setup instructions.".into());
        }
    };

    if let Some(msg) = message {
        // Single message mode
        let reply = orchestrator
            .handle(InboundMessage::new(&user, msg).with_channel(CHANNEL))
            .await?;
        println!("{}", reply.response_text);
        print_footer(&reply);
    } else {
        println!();
        println!("  MeshBrain Interactive Mode");
        println!();
        println!(
            "  Providers: {}",
            orchestrator.router().provider_names().join(" → ")
        );
        println!("  User:      {user}");
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'exit' or Ctrl+D to quit.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt()?;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line == "exit" || line == "quit" {
                break;
            }
            if line.is_empty() {
                prompt()?;
                continue;
            }

            match orchestrator
                .handle(InboundMessage::new(&user, line).with_channel(CHANNEL))
                .await
            {
                Ok(reply) => {
                    println!();
                    for text in reply.response_text.lines() {
                        println!("  Assistant > {text}");
                    }
                    print_footer(&reply);
                    println!();
                }
                Err(e) => eprintln!("  [Error] {e}"),
            }
            prompt()?;
        }

        println!();
        println!("  Goodbye!");
        println!();
    }

    orchestrator.flush().await;
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_footer(reply: &Reply) {
    let mut footer = format!(
        "  [{} · {}ms · {} context turns",
        reply.provider_used, reply.latency_ms, reply.context_turns_used
    );
    if reply.had_error {
        footer.push_str(" · all providers failed");
    }
    if reply.timed_out {
        footer.push_str(" · timed out");
    }
    footer.push(']');
    eprintln!("{footer}");
}
