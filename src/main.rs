use std::sync::Arc;
use log::{error, info};

use hf_gateway::config::Config;
use hf_gateway::server::{self, AppState};
use hf_gateway::{logging, InferenceService};

#[tokio::main]
async fn main()
{   // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = match Config::from_env()
    {   Ok(config) => config
      , Err(e) => {
          eprintln!("Failed to load configuration: {}", e);
          std::process::exit(1);
        }
    };
    if let Err(e) = config.validate()
    {   eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = logging::init(&config.logger)
    {   eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
      version = server::SERVICE_VERSION, port = config.server.port,
      log_level = config.logger.level.as_str(),
      model = config.hugging_face.default_model.as_str();
      "Starting hf-gateway server"
    );

    let service = match InferenceService::from_config(&config.hugging_face)
    {   Ok(service) => service
      , Err(e) => {
          error!(error:% = e; "Failed to create inference service");
          std::process::exit(1);
        }
    };
    let state = AppState::new(
        Arc::new(service)
      , config.hugging_face.rate_limit_rpm
      )
      .with_request_timeout(config.server.request_timeout());

    if let Err(e) = server::serve(&config.server, state).await
    {   error!(error:% = e; "Server failed");
        std::process::exit(1);
    }
    info!("Server exited properly");
}
