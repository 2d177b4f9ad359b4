use anyhow::Result;
use novelforge::config::Config;
use novelforge::llm;
use novelforge::pipeline::{Pipeline, StageAborted};
use novelforge::storage::NativeStorage;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let llm = llm::create_llm(&config)?;
    let storage = Arc::new(NativeStorage::new());

    let mut pipeline = Pipeline::new(config.clone(), llm, storage);
    match pipeline.run().await {
        Ok(_) => {
            println!(
                "Book generation complete. The novel has been saved to {}/novel.txt",
                config.output_folder
            );
            Ok(())
        }
        Err(e) => {
            if let Some(aborted) = e.downcast_ref::<StageAborted>() {
                eprintln!("Book generation failed at the {} stage.", aborted.stage);
            }
            Err(e)
        }
    }
}
