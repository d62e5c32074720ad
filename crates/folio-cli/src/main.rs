//! 🚀 folio-cli: the front door, the bouncer, the maitre d' of folio.
//!
//! 🎬 *[narrator voice]* "It all started with a directory full of page_*.png..."
//! 📦 This binary finds the pages, loads the config, sets up logging, and lets
//! the library stand in line at the GPU. Then it writes down what came back. 🦆

mod pages;
mod report;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 📄 Transcribe a directory of page images through a vision-language model.
#[derive(Debug, Parser)]
#[command(name = "folio", version)]
struct Args {
    /// Directory holding the page images (page_1.png, page_2.png, ...)
    pages_dir: PathBuf,

    /// TOML config. If it doesn't exist, FOLIO_* env vars are all we go on.
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    /// Where to write one NDJSON record per request.
    #[arg(short, long, default_value = "results.ndjson")]
    output: PathBuf,
}

/// 🚀 main(): the "I pressed F5 and held my breath" moment.
///
/// 1. Init tracing
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Find pages, dispatch them, write results
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG=info is the sweet spot. debug shows every state change. trace shows every request.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if let Err(err) = transcribe(args).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("did not become ready")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the inference server isn't reachable or never finished loading. \
                Check that the router/vLLM pod is running (`kubectl get pods`), that base_url ends in /v1, \
                and that readiness.max_wait_secs covers a cold start. Even GPUs need a coffee sometimes. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn transcribe(args: Args) -> Result<()> {
    // 🔒 Use the config file only if it's really there; otherwise env vars carry the whole load.
    let config_file = args.config.as_path();
    let config_file_path_which_is_validated_to_exist = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
             try an absolute one. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = folio::app_config::load_config(config_file_path_which_is_validated_to_exist)
        .context("💀 In folio-cli we couldn't load the config. Make sure [endpoint] and dispatch.model are set")?;

    let items = pages::discover_pages(&args.pages_dir).await?;
    if items.is_empty() {
        info!("🫙 No page images in '{}', nothing to do", args.pages_dir.display());
    }

    let (outcomes, stats) = folio::run(&app_config, items).await?;

    report::write_ndjson(&args.output, &outcomes).await?;
    info!("💾 Wrote {} records to '{}'", outcomes.len(), args.output.display());
    println!("{}", report::summary_table(&stats));

    Ok(())
}
