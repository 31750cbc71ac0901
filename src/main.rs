use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting remote assistance agent");

    let state = match remote_assist_agent::bootstrap().await {
        Ok(state) => state,
        Err(e) => {
            error!("agent bootstrap failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("signal handling failed: {}", e);
    }

    info!("shutdown requested, tearing down");
    state.session_manager.shutdown().await;
    state.shutdown.cancel();
}
