//! Messaging channel seam

use async_trait::async_trait;

/// Outbound side of a chat platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Deliver a reply. Returns whether the platform accepted it.
    async fn send(&self, user_id: &str, text: &str) -> bool;

    /// Show a "typing..." hint while a turn is processed
    async fn typing_indicator(&self, _user_id: &str) {}
}
