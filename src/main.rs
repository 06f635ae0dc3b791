use log::{error, info};
use service::{config::Config, logging::Logger, AppState};

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting realtime fan-out server [{}]...",
        config.runtime_env()
    );

    let medium = match service::init_medium(&config).await {
        Ok(medium) => medium,
        Err(e) => {
            error!("Failed to connect to the pub/sub medium: {e}");
            std::process::exit(1);
        }
    };

    let app_state = AppState::new(config, medium);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
