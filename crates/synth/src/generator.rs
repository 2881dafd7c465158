use crate::error::Result;
use async_trait::async_trait;

/// Single-turn text completion service used to draft epics.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> String;

    async fn complete(&self, prompt: &str) -> Result<String>;
}
