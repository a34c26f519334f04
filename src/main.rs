use anyhow::Result;
use std::sync::Arc;

use thumbforge::core::config::Config;
use thumbforge::core::io::{NativeStorage, Storage};
use thumbforge::services::channel::create_channel_fetcher;
use thumbforge::services::llm::create_llm;
use thumbforge::services::materials::FsPreviewBackend;
use thumbforge::services::persistence::JsonlThumbnailStore;
use thumbforge::services::synthesis::create_synthesizer;
use thumbforge::services::workflow::{Collaborators, WorkflowManager};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!(
                "Please ensure 'config.yml' exists with llm, synthesis and channel settings."
            );
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Collaborators
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let collaborators = Collaborators {
        llm: create_llm(&config.llm)?,
        synthesizer: create_synthesizer(&config.synthesis),
        channels: create_channel_fetcher(&config.channel)?,
        store: Box::new(JsonlThumbnailStore::new(
            storage.clone(),
            config.records_path().to_string_lossy(),
        )),
        previews: Arc::new(FsPreviewBackend::new(config.preview_folder())),
    };

    // 3. Resume the previous session if there is one, then drive the steps
    let mut manager = WorkflowManager::restore(
        config.workflow.clone(),
        collaborators,
        storage,
        config.session_path().to_string_lossy(),
    )
    .await?;
    thumbforge::ui::run(&mut manager).await?;

    Ok(())
}
