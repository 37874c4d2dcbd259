use qi_edge_inference::{AppError, CoordinatorBuilder, EdgeSettings};
use tracing::{Level, error, info};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

async fn run() -> Result<(), AppError> {
    let settings = EdgeSettings::from_env()?;
    info!(
        "Starting with images from {:?} and model {:?}",
        settings.image_dir, settings.model_dir
    );

    let coordinator = CoordinatorBuilder::new(settings).build().await?;
    coordinator
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        error!("Inference stopped: {}", e);
        std::process::exit(1);
    }
}
