pub mod client;
pub mod json;
pub mod limiter;
pub mod pricing;
pub mod usage;

pub use client::{
    Completer, Completion, CompletionOptions, LlmClient, Message, DEFAULT_MODEL, MODEL_HAIKU,
    MODEL_OPUS, MODEL_SONNET,
};
pub use json::parse_loose;
pub use limiter::RequestWindow;
pub use usage::{ModelUsage, UsageSnapshot, UsageTracker};
