//! formwork - run a parametric scene script and print its formula values.
//!
//! Usage: `formwork [--config config.json] [scene.json]`. Without a scene
//! script the built-in cabinet demo runs.

mod script;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use formwork_core::EngineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::script::SceneScript;

#[derive(Parser)]
#[command(name = "formwork")]
#[command(about = "Run a parametric scene script and print its formula values")]
struct Args {
    /// Engine configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Scene script (JSON). The built-in demo runs when omitted.
    scene: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let script = match &args.scene {
        Some(path) => SceneScript::load(path)?,
        None => {
            info!("no scene script given, running the built-in demo");
            SceneScript::demo()
        }
    };

    let orchestrator = script.run(&config)?;
    for line in script::report(&orchestrator) {
        println!("{line}");
    }
    Ok(())
}
