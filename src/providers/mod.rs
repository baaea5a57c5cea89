//! Upstream inference API clients

pub mod huggingface;

// Re-export for convenience
pub use huggingface::{HuggingFaceClient, InferenceOptions, InferencePayload};
