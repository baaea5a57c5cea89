pub mod error;
pub mod config;
pub mod logging;
pub mod providers;
pub mod request;
pub mod retry;
pub mod normalize;
pub mod client;
pub mod server;

/*

hf-gateway: a small REST gateway in front of the Hugging Face
Inference API. Callers send generation, sentiment, or summarization
requests; we validate them, forward them with bounded retries, and
reshape whatever comes back into one stable schema.

hf-gateway/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Re-exports
│   ├── main.rs         # Binary: config, logging, listener
│   ├── error.rs        # Error taxonomy
│   ├── config.rs       # Environment-driven configuration
│   ├── logging.rs      # env_logger setup
│   ├── request.rs      # Request/result types
│   ├── retry.rs        # Retry policy
│   ├── normalize.rs    # Upstream body -> result records
│   ├── client.rs       # Request orchestration
│   ├── providers/      # Upstream transports
│   │   ├── mod.rs
│   │   └── huggingface.rs
│   └── server/         # axum routes and middleware
│       ├── mod.rs
│       ├── handlers.rs
│       ├── middleware.rs
│       └── rate_limit.rs
└── tests/              # Integration tests against a stub upstream

*/

pub use client::{InferenceApi, InferenceService, GenerationDefaults};
pub use config::Config;
pub use error::{Error, UpstreamError};
pub use providers::HuggingFaceClient;
pub use request::{
  Choice, ErrorResponse, GenerationRequest, GenerationResult, ParamValue,
  SentimentResult, SummaryResult, UsageEstimate,
};
pub use retry::RetryPolicy;
