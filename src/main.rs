//! Omnibridge CLI - MCP server for OmniFocus

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use omnibridge::script::ScriptRunner;
use omnibridge::{Config, Dispatcher};

#[derive(Parser)]
#[command(name = "omnibridge")]
#[command(about = "Omnibridge - MCP server exposing OmniFocus to LLM agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over stdio (the normal mode under an MCP client)
    Serve,

    /// Check host availability and run the probe cascade, human-readable
    Diagnose,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout belongs to the MCP protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Serve => {
            if let Err(e) = omnibridge::run_server(config).await {
                eprintln!("server error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Diagnose => {
            let exit = diagnose(config).await;
            std::process::exit(exit);
        }
    }
}

async fn diagnose(config: Config) -> i32 {
    let runner = ScriptRunner::new(config.clone());
    if !runner.host_available() {
        println!("osascript: UNAVAILABLE ({})", config.osascript_path);
        println!("omnibridge needs macOS with the osascript interpreter on PATH.");
        return 1;
    }
    println!("osascript: ok ({})", config.osascript_path);

    let dispatcher = Dispatcher::new(config);
    let envelope = dispatcher
        .handle_system(serde_json::json!({"operation": "diagnostics"}))
        .await;

    match envelope.summary {
        Some(summary) => println!("{summary}"),
        None => println!("diagnostics produced no summary"),
    }
    if let Some(data) = envelope.data {
        if let Some(probes) = data.get("probes").and_then(|p| p.as_array()) {
            for probe in probes {
                let name = probe.get("name").and_then(|v| v.as_str()).unwrap_or("?");
                let ok = probe.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                match probe.get("detail").and_then(|v| v.as_str()) {
                    Some(detail) if !ok => println!("  {name}: FAIL ({detail})"),
                    _ => println!("  {name}: {}", if ok { "ok" } else { "FAIL" }),
                }
            }
        }
    }

    if envelope.success {
        0
    } else {
        1
    }
}
