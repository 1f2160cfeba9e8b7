//! Main entry point for the Markdown Term Translator CLI

#![forbid(unsafe_code)]

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use md_term_translator::cli::commands::{self, Commands};
use md_term_translator::{CancelFlag, TranslatorConfig};

/// Markdown Term Translator - English → Chinese with a shared glossary
#[derive(Parser, Debug)]
#[command(name = "md-term-translator", version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Maximum concurrent requests
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}={}", env!("CARGO_CRATE_NAME"), level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let load_config = || -> anyhow::Result<TranslatorConfig> {
        let mut config = TranslatorConfig::load(args.config.as_deref())?;
        if let Some(max_concurrent) = args.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        Ok(config)
    };

    let cancel = CancelFlag::new();

    // Execute command
    let code = match args.command {
        Commands::Translate {
            input,
            output,
            terminology,
            no_extract,
            mark_fallbacks,
        } => {
            let mut config = load_config()?;
            config.mark_fallbacks |= mark_fallbacks;
            commands::handle_translate(config, input, output, terminology, !no_extract, cancel)
                .await?
        }
        Commands::Extract { input, terminology } => {
            let config = load_config()?;
            commands::handle_extract(config, input, terminology, cancel).await?
        }
        Commands::Terms {
            terminology,
            action,
        } => commands::handle_terms(terminology, action)?,
    };

    std::process::exit(code);
}
