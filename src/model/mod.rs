//! Model transport and the model-backed planners.

mod client;
mod planners;

pub use client::{
    split_reasoning, MessageBuilder, ModelClient, ModelConfig, ModelError, ModelResponse,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS,
};
pub use planners::{ModelActionPlanner, ModelCompletionVerifier, ModelStrategicPlanner};
