pub mod cache_gateway;
pub mod consumer;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod publisher;
pub mod retrieval;
pub mod retry;
