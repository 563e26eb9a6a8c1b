use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use toolbridge::mcp_client::{load_config, McpClient};

/// Connect to the configured tool providers and inspect or call their tools.
#[derive(Parser)]
#[command(name = "toolbridge", version, about)]
struct Cli {
    /// Provider configuration file (YAML or JSON).
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG", default_value = "toolbridge.yaml")]
    config: PathBuf,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the merged tool catalog in function-calling schema.
    Tools,
    /// Invoke one tool and print its result.
    Call {
        tool: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Print per-provider state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    toolbridge::init_tracing(cli.log_file.as_deref()).context("failed to initialize logging")?;

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let mut client = McpClient::new();
    for (name, err) in client.initialize(&config).await {
        eprintln!("provider '{name}' unavailable: {err}");
    }

    let outcome = run(&client, cli.command).await;
    client.shutdown().await;
    outcome
}

async fn run(client: &McpClient, command: Command) -> Result<()> {
    match command {
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&client.openai_tools())?);
        }
        Command::Call { tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }
            let text = client.invoke(&tool, arguments).await?;
            println!("{text}");
        }
        Command::Status => {
            let statuses: Vec<_> = client
                .provider_names()
                .iter()
                .filter_map(|name| client.provider_status(name))
                .collect();
            println!("{}", serde_json::to_string_pretty(&statuses)?);
            eprintln!(
                "{} of {} providers ready",
                client.initialized_count(),
                statuses.len()
            );
        }
    }
    Ok(())
}
