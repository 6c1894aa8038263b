use anyhow::Result;
use crowdin_gpt::{config::Config, orchestrator::Orchestrator};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (absent in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crowdin_gpt=info".parse()?),
        )
        .init();

    info!("Starting Crowdin translation run");

    let config = Config::from_env()?;
    Orchestrator::new(config).run().await?;

    info!("Translation run complete");
    Ok(())
}
