use crate::services::generation::GenerationClient;

/// Shared state for the synchronous generation endpoint
///
/// This path never reads the cache or publishes events.
#[derive(Clone)]
pub struct AppState {
    pub generator: GenerationClient,
}

impl AppState {
    pub fn new(generator: GenerationClient) -> Self {
        Self { generator }
    }
}
