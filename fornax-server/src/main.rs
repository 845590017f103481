use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use fornax_server::{Engine, EventBus, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "fornax-server",
    about = "Furnace line acquisition gateway",
    version
)]
struct Args {
    /// Path to the controller settings file.
    #[arg(short, long, default_value = "fornax.json")]
    settings: PathBuf,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbosity.log_level_filter())
        .init();

    let settings = Settings::load(&args.settings)
        .with_context(|| format!("loading {}", args.settings.display()))?;
    let engine = Arc::new(Engine::new(settings.controller_configs(), EventBus::new()).await?);

    log::info!(
        "fornax-server starting with {} controller(s)",
        engine.controllers().len()
    );

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("engine", move |handle| {
            engine.run(handle)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(Into::into)
}
