//! `anyllm` command-line client.

mod config;
mod demo_tools;
mod session;

use anyllm_client::{ProviderRegistry, UnifiedClient};
use anyllm_tools::FunctionRegistry;
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "anyllm", version, about = "One client for OpenAI-compatible chat APIs")]
struct Cli {
    /// Path to anyllm.toml.
    #[arg(long, global = true, env = "ANYLLM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered providers and their default endpoints.
    Providers,
    /// Stream a plain completion to stdout.
    Chat { prompt: String },
    /// Run a streamed tool-calling conversation with the demo tools.
    Tools { prompt: String },
    /// Print the resolved configuration with the API key redacted.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let registry = ProviderRegistry::with_builtin();

    match cli.command {
        Command::Providers => {
            for kind in registry.supported() {
                println!("{:<10} {}", kind, kind.default_base_url());
            }
            Ok(())
        }
        Command::Config => {
            let cfg = AppConfig::load(cli.config).await?;
            print!("{}", toml::to_string_pretty(&cfg.redacted())?);
            Ok(())
        }
        Command::Chat { prompt } => {
            let cfg = AppConfig::load(cli.config).await?;
            let client = UnifiedClient::new(&registry, cfg.client.clone())?;
            tracing::info!(provider = client.provider_name(), model = %cfg.model, "chat");
            session::run_chat(&client, &cfg, &prompt, &mut std::io::stdout()).await?;
            Ok(())
        }
        Command::Tools { prompt } => {
            let cfg = AppConfig::load(cli.config).await?;
            let client = UnifiedClient::new(&registry, cfg.client.clone())?;
            let functions = FunctionRegistry::new();
            demo_tools::register_demo_tools(&functions);
            tracing::info!(
                provider = client.provider_name(),
                model = %cfg.model,
                tools = ?functions.function_names(),
                "tool session"
            );
            session::run_tools(
                &client,
                &functions,
                demo_tools::demo_tools(),
                &cfg,
                &prompt,
                &mut std::io::stdout(),
            )
            .await?;
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,anyllm=debug,anyllm_client=debug,anyllm_tools=debug"),
    };
    let log_format = std::env::var("ANYLLM_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr so streamed model output on stdout stays clean.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .pretty()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported ANYLLM_LOG_FORMAT={other:?}; expected one of: json, pretty"
            ));
        }
    }

    tracing::debug!(log_format = %log_format, "tracing initialized");
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(panic_location = %location, "panic captured");
        default_hook(panic_info);
    }));
}
