// Entrypoint for the uploader.
// - Reads configuration, prints the banner and fetches the first token.
// - A failed first token exchange ends the process with a non-zero code;
//   after that, failures only abandon the affected file's run.

use anyhow::Context;
use podbean_autoupload::api::{PodbeanClient, PodcastHost};
use podbean_autoupload::config::{self, Config};
use podbean_autoupload::pipeline::Pipeline;
use podbean_autoupload::token::TokenManager;
use podbean_autoupload::watcher::{self, FolderWatcher};
use podbean_autoupload::{logging, ui};
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = config::load_dotenv();
    let config = Config::from_env().context("Invalid configuration")?;
    logging::init(config.is_production());
    if let Some(path) = dotenv {
        debug!(path = %path.display(), "loaded environment file");
    }

    ui::print_banner(&config)?;

    let host: Arc<dyn PodcastHost> =
        Arc::new(PodbeanClient::from_config(&config).context("Failed to build HTTP client")?);
    let tokens = Arc::new(TokenManager::new(host.clone()));

    let spinner = ui::spinner("Requesting token from Podbean...");
    let token = tokens.acquire().await;
    spinner.finish_and_clear();
    token.context("Could not obtain a Podbean token")?;
    info!("token acquired");

    let pipeline = Arc::new(Pipeline::from_config(&config, host, tokens));
    pipeline
        .sink()
        .prepare()
        .await
        .context("Could not create the archive folder")?;

    let folder = FolderWatcher::watch(&config.watch_dir)
        .with_context(|| format!("Could not watch {}", config.watch_dir.display()))?;
    info!("waiting for new files...");

    tokio::select! {
        _ = watcher::dispatch(folder, pipeline) => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
