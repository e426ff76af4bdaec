use async_trait::async_trait;

use crate::error::BridgeResult;

/// Start/stop hooks driven by the framework's lifecycle manager.
///
/// Both calls take `&mut self`, so start and stop on one bridge never overlap.
/// Implementations make `stop` a no-op when not started and `start` a no-op when running.
#[async_trait]
pub trait Lifecycle: Send {
    async fn start(&mut self) -> BridgeResult<()>;
    async fn stop(&mut self) -> BridgeResult<()>;
    fn is_running(&self) -> bool;
}
